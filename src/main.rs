/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A terminal front end for section-cruiser.
//!
//! Talks to a browser started with `--remote-debugging-port=9222` and
//! drives its frontmost tab.
//!
//! ```bash
//! section-cruiser sections
//! section-cruiser cruise --exclude shopify-section-announcement-bar
//! section-cruiser cruise --yes --warmup-ms 3000
//! section-cruiser preview shopify-section-hero -o hero.png
//! ```

use std::process;
use std::time::Duration;

use bpaf::Bpaf;
use image::ImageFormat;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

use section_cruiser::{
    CruiseError, CruiseOptions, NO_ACTIVE_TAB, PageHandle, PopupView, ScrollConfig,
    ScrollController, SectionPicker,
};

type StdinLines = tokio::io::Lines<BufReader<tokio::io::Stdin>>;

// ---------------------------------------------------------------------------
// CLI parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, usage("section-cruiser [OPTIONS] COMMAND ..."))]
struct CruiserConfig {
    /// DevTools HTTP endpoint of the running browser
    #[bpaf(long, argument("URL"), parse(parse_endpoint), fallback(default_endpoint()))]
    endpoint: String,

    /// CSS selector that identifies page sections
    #[bpaf(long, argument("SELECTOR"), fallback(default_selector()))]
    selector: String,

    /// Maximum time to wait for a protocol reply
    #[bpaf(long, argument("SECONDS"), fallback(30u64))]
    timeout: u64,

    #[bpaf(external(command))]
    command: Command,
}

#[derive(Debug, Clone, Bpaf)]
enum Command {
    /// List the section ids found on the active tab
    #[bpaf(command("sections"))]
    Sections,

    /// Auto-scroll the active tab, slowing near each unexcluded section
    #[bpaf(command("cruise"))]
    Cruise {
        /// Exclude a section id from slowdowns (repeatable)
        #[bpaf(long("exclude"), argument("ID"))]
        exclude: Vec<String>,

        /// Skip the interactive picker and start immediately
        #[bpaf(long, short)]
        yes: bool,

        /// Delay before the first scroll step, 0 or 3000
        #[bpaf(long("warmup-ms"), argument("MS"), guard(warmup_ok, "must be 0 or 3000"), fallback(0u64))]
        warmup_ms: u64,
    },

    /// Highlight one section and save a screenshot of the tab
    #[bpaf(command("preview"))]
    Preview {
        /// File to save (png or jpg)
        #[bpaf(long, short, argument("PATH"), fallback(default_output()))]
        output: String,

        /// Section id to highlight
        #[bpaf(positional("ID"))]
        id: String,
    },
}

fn parse_endpoint(s: String) -> Result<String, String> {
    Url::parse(&s).map_err(|e| format!("Invalid endpoint: {e}"))?;
    Ok(s)
}

fn warmup_ok(ms: &u64) -> bool {
    *ms == 0 || *ms == 3000
}

fn default_endpoint() -> String {
    CruiseOptions::default().endpoint
}

fn default_selector() -> String {
    CruiseOptions::default().selector
}

fn default_output() -> String {
    "preview.png".to_string()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cruiser_config().run();
    if let Err(err) = run(config).await {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

async fn run(config: CruiserConfig) -> Result<(), CruiseError> {
    let options = CruiseOptions {
        endpoint: config.endpoint,
        selector: config.selector,
        call_timeout: config.timeout,
    };

    match config.command {
        Command::Sections => sections_cmd(&options).await,
        Command::Cruise {
            exclude,
            yes,
            warmup_ms,
        } => cruise_cmd(&options, exclude, yes, warmup_ms).await,
        Command::Preview { output, id } => preview_cmd(&options, &id, &output).await,
    }
}

/// Attach to the active tab, or print the popup notice and bail when
/// the endpoint exposes none.
async fn attach_or_notice(options: &CruiseOptions) -> Result<Option<PageHandle>, CruiseError> {
    match PageHandle::attach_active(options).await {
        Ok(page) => Ok(Some(page)),
        Err(CruiseError::NoActiveTab) => {
            println!("{NO_ACTIVE_TAB}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn sections_cmd(options: &CruiseOptions) -> Result<(), CruiseError> {
    let Some(page) = attach_or_notice(options).await? else {
        return Ok(());
    };

    match PopupView::for_sections(page.locate_sections().await?) {
        PopupView::Picker(picker) => {
            for row in picker.rows() {
                println!("{}", row.id);
            }
        }
        other => {
            if let Some(notice) = other.notice() {
                println!("{notice}");
            }
        }
    }
    Ok(())
}

async fn cruise_cmd(
    options: &CruiseOptions,
    exclude: Vec<String>,
    yes: bool,
    warmup_ms: u64,
) -> Result<(), CruiseError> {
    let Some(page) = attach_or_notice(options).await? else {
        return Ok(());
    };
    page.ensure_highlight_style().await?;

    let mut picker = match PopupView::for_sections(page.locate_sections().await?) {
        PopupView::Picker(picker) => picker,
        other => {
            if let Some(notice) = other.notice() {
                println!("{notice}");
            }
            return Ok(());
        }
    };

    for id in &exclude {
        if !picker.set_excluded(id, true) {
            warn!("no section named {id:?}, ignoring exclusion");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if !yes && !pick_interactively(&page, &mut picker, &mut lines).await? {
        eprintln!("Nothing started.");
        return Ok(());
    }

    let scroll_config = ScrollConfig {
        startup_delay: Duration::from_millis(warmup_ms),
        ..ScrollConfig::default()
    };
    let controller = ScrollController::new(page.clone(), page, scroll_config);
    controller.start(picker.exclusions());

    eprintln!("Scrolling... press Enter or Ctrl-C to stop.");
    tokio::select! {
        _ = controller.wait_until_idle() => {}
        _ = wait_for_enter(&mut lines) => {
            controller.stop();
            controller.wait_until_idle().await;
        }
        _ = tokio::signal::ctrl_c() => {
            controller.stop();
            controller.wait_until_idle().await;
        }
    }
    Ok(())
}

/// Resolve on the next line of input. A closed stdin never resolves, so
/// a piped `--yes` run is stopped by Ctrl-C or the bottom of the page.
async fn wait_for_enter(lines: &mut StdinLines) {
    loop {
        match lines.next_line().await {
            Ok(Some(_)) => return,
            Ok(None) | Err(_) => std::future::pending::<()>().await,
        }
    }
}

/// Render the checkbox rows on the terminal and apply the user's edits.
/// Returns false when the user quit instead of starting.
async fn pick_interactively(
    page: &PageHandle,
    picker: &mut SectionPicker,
    lines: &mut StdinLines,
) -> Result<bool, CruiseError> {
    loop {
        println!();
        println!("Sections (checked = excluded from slowdowns):");
        for (index, row) in picker.rows().iter().enumerate() {
            let mark = if row.excluded { "x" } else { " " };
            println!("  {:2}. [{mark}] {}", index + 1, row.id);
        }
        println!("Toggle with a number, preview with p NUMBER, start with Enter, quit with q.");

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => return Ok(false),
        };
        let input = line.trim();

        if input.is_empty() || input.eq_ignore_ascii_case("go") {
            return Ok(true);
        }
        if input.eq_ignore_ascii_case("q") {
            return Ok(false);
        }
        if let Some(rest) = input.strip_prefix('p').or_else(|| input.strip_prefix('P')) {
            if let Ok(number) = rest.trim().parse::<usize>() {
                let row = number.checked_sub(1).and_then(|i| picker.rows().get(i));
                match row {
                    Some(row) => page.flash(&row.id, Duration::from_millis(1200)).await?,
                    None => println!("No row {number}."),
                }
                continue;
            }
        }
        match input.parse::<usize>() {
            Ok(number) => {
                let toggled = number.checked_sub(1).and_then(|i| picker.toggle(i));
                if toggled.is_none() {
                    println!("No row {number}.");
                }
            }
            Err(_) => println!("Unrecognized input {input:?}."),
        }
    }
}

async fn preview_cmd(options: &CruiseOptions, id: &str, output: &str) -> Result<(), CruiseError> {
    let Some(page) = attach_or_notice(options).await? else {
        return Ok(());
    };

    let png = page.screenshot_highlighted(id).await?;

    let format = ImageFormat::from_path(output).unwrap_or(ImageFormat::Png);
    if format == ImageFormat::Png {
        std::fs::write(output, &png).map_err(|e| CruiseError::ScreenshotFailed(e.to_string()))?;
    } else {
        // Re-encode from PNG to the requested format.
        let img = image::load_from_memory(&png)
            .map_err(|e| CruiseError::ScreenshotFailed(e.to_string()))?;
        img.save_with_format(output, format)
            .map_err(|e| CruiseError::ScreenshotFailed(e.to_string()))?;
    }
    eprintln!("Screenshot saved to {output}");
    Ok(())
}

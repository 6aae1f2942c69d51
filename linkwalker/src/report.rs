//! Console and JSON rendering of a finished crawl.

use ansi_term::Color::{self, Blue, Green, Purple, Red, White, Yellow};
use serde_derive::Serialize;

use lib_linkwalker::{FetchStatus, Page, SiteModel};

fn color_for_status(status: &FetchStatus) -> Color {
    match status {
        FetchStatus::Ok(_) => Green,
        FetchStatus::Redirected { .. } => Blue,
        FetchStatus::Skipped(_) => White,
        FetchStatus::HttpError(code) if *code < 500 => Yellow,
        FetchStatus::HttpError(_) => Red,
        FetchStatus::Timeout | FetchStatus::ConnectionError(_) | FetchStatus::InvalidUrl(_) => Red,
        FetchStatus::Pending | FetchStatus::InFlight => Purple,
    }
}

fn sorted_pages(model: &SiteModel) -> Vec<&Page> {
    let mut pages = model.pages().collect::<Vec<_>>();
    pages.sort_by(|a, b| a.url.cmp(&b.url));
    pages
}

/// One `source:line:col` locator per incoming reference.
fn sources_of(page: &Page) -> Vec<String> {
    page.incoming
        .iter()
        .map(|incoming| match (incoming.line, incoming.column) {
            (Some(line), Some(column)) => format!("{}:{}:{}", incoming.source, line, column),
            _ => incoming.source.to_string(),
        })
        .collect()
}

pub fn print_console(model: &SiteModel) {
    let stats = model.stats();

    println!(
        "Crawled {}: {} pages, {} fetched, {} skipped.",
        model
            .start_urls()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        stats.pages,
        stats.fetched,
        stats.skipped,
    );

    for page in sorted_pages(model) {
        if !page.is_erroneous() {
            continue;
        }

        let color = color_for_status(&page.status);
        println!();
        println!("{} {}", color.bold().paint("⏺"), White.bold().paint(page.url.to_string()));
        println!("    status: {}", color.paint(page.status.to_string()));

        let sources = sources_of(page);
        if sources.is_empty() {
            println!("    linked from: <start url>");
        } else {
            println!("    linked from:\n        {}", sources.join("\n        "));
        }
    }

    println!();
    if stats.erroneous == 0 {
        println!("{}: no broken links found", Green.bold().paint("ok"));
    } else {
        println!(
            "{}: {} broken link(s)",
            Red.bold().paint("error"),
            stats.erroneous,
        );
    }
}

#[derive(Serialize)]
struct JsonSummary {
    start_urls: Vec<String>,
    pages: usize,
    fetched: usize,
    skipped: usize,
    erroneous: usize,
    broken: Vec<JsonBroken>,
}

#[derive(Serialize)]
struct JsonBroken {
    url: String,
    status: String,
    depth: u16,
    sources: Vec<String>,
}

pub fn print_json(model: &SiteModel) {
    let stats = model.stats();

    let broken = sorted_pages(model)
        .into_iter()
        .filter(|page| page.is_erroneous())
        .map(|page| JsonBroken {
            url: page.url.to_string(),
            status: page.status.to_string(),
            depth: page.depth,
            sources: sources_of(page),
        })
        .collect();

    let summary = JsonSummary {
        start_urls: model
            .start_urls()
            .iter()
            .map(ToString::to_string)
            .collect(),
        pages: stats.pages,
        fetched: stats.fetched,
        skipped: stats.skipped,
        erroneous: stats.erroneous,
        broken,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("can serialize")
    );
}

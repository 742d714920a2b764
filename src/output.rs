//! CLI output formatting.
//!
//! Every entity is shown as a header line followed by indented context
//! lines, so the output reads as an inventory:
//!
//! ```text
//! 0123456789abcdef0123456789abcdef (jpg, 1920x1200)
//!     Name: holiday.jpg
//!     Original: /assets/images/01/01234567/0123456789abcdef0123456789abcdef_or_or.jpg
//!
//! Aspects
//!     16x9  16:9
//!     or    source
//!
//! Sizes
//!     or    native
//!     sm    100px
//! ```
//!
//! Each entity has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::manager::DerivativeResult;
use crate::model::ImageRecord;
use crate::presets::{AspectRatio, MaxSize};
use std::collections::BTreeMap;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Header plus context lines for one record. `original_url` is the
/// cache-busted URL of its `or`/`or` file.
pub fn format_record(record: &ImageRecord, original_url: &str) -> Vec<String> {
    let mut lines = vec![format!(
        "{} ({}, {}x{}{})",
        record.hash,
        record.image_type,
        record.width,
        record.height,
        if record.animated { ", animated" } else { "" }
    )];
    if let Some(id) = record.id {
        lines.push(format!("{}Id: {}", indent(1), id));
    }
    lines.push(format!("{}Name: {}", indent(1), record.original_name));
    lines.push(format!("{}Original: {}", indent(1), original_url));
    lines
}

pub fn print_record(record: &ImageRecord, original_url: &str) {
    for line in format_record(record, original_url) {
        println!("{}", line);
    }
}

fn describe_aspect(aspect: &AspectRatio) -> String {
    match aspect {
        AspectRatio::Ratio(r) => format!("{r:.4}"),
        AspectRatio::Derive => "source".to_string(),
    }
}

fn describe_size(size: &MaxSize) -> String {
    match size {
        MaxSize::Pixels(px) => format!("{px}px"),
        MaxSize::Native => "native".to_string(),
    }
}

/// Both preset catalogs, names aligned.
pub fn format_presets(
    aspects: &BTreeMap<String, AspectRatio>,
    sizes: &BTreeMap<String, MaxSize>,
) -> Vec<String> {
    let width = aspects
        .keys()
        .chain(sizes.keys())
        .map(String::len)
        .max()
        .unwrap_or(0);
    let mut lines = vec!["Aspects".to_string()];
    for (name, aspect) in aspects {
        lines.push(format!("{}{:<width$}  {}", indent(1), name, describe_aspect(aspect)));
    }
    lines.push(String::new());
    lines.push("Sizes".to_string());
    for (name, size) in sizes {
        lines.push(format!("{}{:<width$}  {}", indent(1), name, describe_size(size)));
    }
    lines
}

pub fn print_presets(aspects: &BTreeMap<String, AspectRatio>, sizes: &BTreeMap<String, MaxSize>) {
    for line in format_presets(aspects, sizes) {
        println!("{}", line);
    }
}

/// One line describing where a derivative ended up.
pub fn format_result(result: &DerivativeResult) -> String {
    match result {
        DerivativeResult::File { path, mime } => format!("{} ({})", path.display(), mime),
        DerivativeResult::Encoded(encoded) => format!(
            "in memory: {}x{} {} ({} bytes, placeholder)",
            encoded.width,
            encoded.height,
            encoded.mime,
            encoded.bytes.len()
        ),
    }
}

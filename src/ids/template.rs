// ============================================================================
// File: packages/gridplane/src/ids/template.rs
// ----------------------------------------------------------------------------
// Placeholder substitution for identifier templates.
// ============================================================================

use chrono::{DateTime, Datelike, Utc};

use super::ObjectType;
use crate::error::{GridError, GridResult};

/// Values available to a template
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub counter: u64,
    pub object_type: ObjectType,
    pub name: &'a str,
    pub site: &'a str,
    pub now: DateTime<Utc>,
}

// Longer keywords first where one is a suffix of another ($MANAME, $UNAME, $NAME).
const KEYWORDS: [&str; 9] = [
    "DAY", "MONTH", "YEAR", "CPT", "SITE", "MANAME", "UNAME", "NAME", "TYPE",
];

/// Render `format`, replacing every `$KEYWORD` with its value.
///
/// A `$` that does not start a known keyword is rejected.
pub fn render_template(format: &str, ctx: &TemplateContext<'_>) -> GridResult<String> {
    let mut rendered = String::with_capacity(format.len() + 16);
    let mut rest = format;

    while let Some(pos) = rest.find('$') {
        rendered.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        let keyword = KEYWORDS
            .iter()
            .find(|k| tail.starts_with(**k))
            .ok_or_else(|| {
                GridError::system(format!(
                    "Unknown placeholder at '{}' in id format '{}'",
                    &rest[pos..],
                    format
                ))
            })?;

        rendered.push_str(&keyword_value(keyword, ctx));
        rest = &tail[keyword.len()..];
    }
    rendered.push_str(rest);

    Ok(rendered)
}

fn keyword_value(keyword: &str, ctx: &TemplateContext<'_>) -> String {
    match keyword {
        "DAY" => format!("{:02}", ctx.now.day()),
        "MONTH" => format!("{:02}", ctx.now.month()),
        "YEAR" => ctx.now.year().to_string(),
        "CPT" => ctx.counter.to_string(),
        "SITE" => ctx.site.to_string(),
        "MANAME" | "UNAME" | "NAME" => ctx.name.to_string(),
        "TYPE" => ctx.object_type.type_letter().to_string(),
        _ => String::new(),
    }
}

// ============================================================================
// File: packages/gridplane/src/backends/macros.rs
// ----------------------------------------------------------------------------
// Script-level job macros.
//
// Scripts refer to the job id, name and node count through portable
// `$GRID_JOB_*` macros. Each backend rewrites them into whatever its
// execution environment provides before the script is uploaded.
// ============================================================================

/// Replacement text for each job macro
#[derive(Debug, Clone, Copy)]
pub struct JobMacros {
    pub job_id: &'static str,
    pub job_name: &'static str,
    pub num_nodes: &'static str,
}

const MACRO_ID: &str = "GRID_JOB_ID";
const MACRO_NAME: &str = "GRID_JOB_NAME";
const MACRO_NUM_NODES: &str = "GRID_JOB_NUM_NODES";

impl JobMacros {
    /// Rewrite `$MACRO` and `${MACRO}` occurrences in `script`
    pub fn apply(&self, script: &str) -> String {
        let mut rewritten = script.to_string();
        for (name, value) in [
            (MACRO_ID, self.job_id),
            (MACRO_NAME, self.job_name),
            (MACRO_NUM_NODES, self.num_nodes),
        ] {
            rewritten = rewritten.replace(&format!("${{{name}}}"), value);
            rewritten = replace_bare(&rewritten, name, value);
        }
        rewritten
    }
}

/// Replace `$name` only where the name is not the prefix of a longer word
fn replace_bare(text: &str, name: &str, value: &str) -> String {
    let needle = format!("${name}");
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(&needle) {
        let after = &rest[pos + needle.len()..];
        let continues_word = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        out.push_str(&rest[..pos]);
        if continues_word {
            out.push_str(&needle);
        } else {
            out.push_str(value);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

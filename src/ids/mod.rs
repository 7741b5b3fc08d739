// ============================================================================
// File: packages/gridplane/src/ids/mod.rs
// ----------------------------------------------------------------------------
// Human-readable, collision-free object identifiers.
//
// - ObjectType: the families of objects that receive generated identifiers
// - template: placeholder substitution ($CPT, $NAME, $YEAR, ...)
// - allocator: counter reservation and uniqueness-checked id assignment
// ============================================================================

mod allocator;
mod template;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use allocator::{IdentifierAllocator, MAX_RESERVE_ATTEMPTS};
pub use template::{TemplateContext, render_template};

/// Object families that receive generated identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    Machine,
    User,
    Job,
    FileTransfer,
    AuthSystem,
    Work,
}

impl ObjectType {
    pub const ALL: [ObjectType; 6] = [
        ObjectType::Machine,
        ObjectType::User,
        ObjectType::Job,
        ObjectType::FileTransfer,
        ObjectType::AuthSystem,
        ObjectType::Work,
    ];

    /// Single letter rendered by `$TYPE`
    pub fn type_letter(&self) -> &'static str {
        match self {
            ObjectType::Machine => "M",
            ObjectType::User => "U",
            ObjectType::Job => "J",
            ObjectType::FileTransfer => "F",
            ObjectType::AuthSystem => "A",
            ObjectType::Work => "W",
        }
    }

    /// Template used when the configuration does not override it
    pub fn default_format(&self) -> &'static str {
        match self {
            ObjectType::Machine | ObjectType::User => "$NAME",
            ObjectType::Job => "J_$CPT",
            ObjectType::FileTransfer => "TR_$CPT",
            ObjectType::AuthSystem => "AUTH_$CPT",
            ObjectType::Work => "$CPT",
        }
    }

    /// Owning table, used in storage diagnostics
    pub fn table_name(&self) -> &'static str {
        match self {
            ObjectType::Machine => "machine",
            ObjectType::User => "users",
            ObjectType::Job => "job",
            ObjectType::FileTransfer => "filetransfer",
            ObjectType::AuthSystem => "authsystem",
            ObjectType::Work => "work",
        }
    }
}

/// Per-type identifier templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdFormats {
    #[serde(default)]
    overrides: HashMap<ObjectType, String>,
}

impl IdFormats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the template of one object type
    pub fn with_format<F: Into<String>>(mut self, object_type: ObjectType, format: F) -> Self {
        self.overrides.insert(object_type, format.into());
        self
    }

    pub fn format_for(&self, object_type: ObjectType) -> &str {
        self.overrides
            .get(&object_type)
            .map(String::as_str)
            .unwrap_or_else(|| object_type.default_format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_object_type() {
        let formats = IdFormats::new().with_format(ObjectType::Job, "$SITE-$CPT");

        assert_eq!(formats.format_for(ObjectType::Job), "$SITE-$CPT");
        assert_eq!(formats.format_for(ObjectType::AuthSystem), "AUTH_$CPT");
        assert_eq!(formats.format_for(ObjectType::User), "$NAME");
    }
}

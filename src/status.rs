//! Lifecycle states persisted as upper-case strings.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        concat!("invalid ", stringify!($name), " '{}'"),
                        other
                    )),
                }
            }
        }
    };
}

string_enum!(ChecksheetStatus {
    Draft => "DRAFT",
    Active => "ACTIVE",
    Archived => "ARCHIVED",
});

string_enum!(ResultStatus {
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
});

string_enum!(ResponseStatus {
    Pending => "PENDING",
    Pass => "PASS",
    Fail => "FAIL",
    Na => "NA",
});

impl ChecksheetStatus {
    /// Drafts are published or shelved; published sheets are archived and
    /// may be reactivated. Nothing returns to draft.
    pub fn can_transition_to(self, next: ChecksheetStatus) -> bool {
        use ChecksheetStatus::*;
        matches!(
            (self, next),
            (Draft, Active) | (Draft, Archived) | (Active, Archived) | (Archived, Active)
        ) || self == next
    }
}

//! Command type enumeration.
//!
//! The wire carries command types as plain strings. [`CommandKind`] gives the
//! known set a closed, typed form while `Custom` keeps the registry open for
//! embedders that register their own types.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Macro generating the known command variants and their wire names.
macro_rules! command_kinds {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// A command type as carried in the `type` field of a command frame.
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum CommandKind {
            $(
                #[doc = concat!("`", $wire, "`")]
                $variant,
            )+
            /// Any type outside the known set.
            Custom(String),
        }

        impl CommandKind {
            /// Every known (non-custom) command kind.
            pub const KNOWN: &'static [CommandKind] = &[$(CommandKind::$variant),+];

            /// Wire representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Custom(name) => name,
                }
            }

            /// Parse a wire string; unknown strings become `Custom`.
            pub fn parse(s: &str) -> Self {
                match s {
                    $($wire => Self::$variant,)+
                    other => Self::Custom(other.to_owned()),
                }
            }
        }
    };
}

command_kinds! {
    Navigate => "navigate",
    Click => "click",
    FillForm => "fill_form",
    GetContent => "get_content",
    Screenshot => "screenshot",
    WaitForElement => "wait_for_element",
    GetPageState => "get_page_state",
    ExecuteScript => "execute_script",
    GetCookies => "get_cookies",
    DetectForms => "detect_forms",
    DetectCaptcha => "detect_captcha",
    StartNetworkMonitoring => "start_network_monitoring",
    StopNetworkMonitoring => "stop_network_monitoring",
    GetNetworkLogs => "get_network_logs",
    ExportNetworkHar => "export_network_har",
    Ping => "ping",
    GetStatus => "get_status",
    ListCommands => "list_commands",
}

impl From<&str> for CommandKind {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for CommandKind {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CommandKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommandKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

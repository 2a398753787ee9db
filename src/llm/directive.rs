//! Tool directives carried in the model identifier.
//!
//! `gpt-4o?mcp=fetch,search&mcp=time` asks for the tools of the `fetch`, `search` and `time`
//! servers to be exposed for this request. The value `all` stands for every configured
//! server, in sorted order.

use tracing::warn;

/// Parameter key naming tool servers
pub const MCP_PARAM: &str = "mcp";

/// Value that expands to every configured server
pub const ALL_SERVERS: &str = "all";

/// Tool servers requested by a directive, deduplicated, in first-mention order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolDirective {
    pub servers: Vec<String>,
}

impl ToolDirective {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Parse the part of a model identifier after `?`.
    ///
    /// `configured` lists the available server names and is used to expand `all`. Parameters
    /// other than `mcp` and malformed `key=value` pairs are ignored with a warning.
    pub fn parse<S: AsRef<str>>(raw: &str, configured: &[S]) -> Self {
        let mut directive = ToolDirective::default();

        for param in raw.split('&').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = param.split_once('=') else {
                warn!(param, "Ignoring malformed directive parameter");
                continue;
            };
            if key.trim() != MCP_PARAM {
                warn!(param, "Ignoring unknown directive parameter");
                continue;
            }

            let value = match urlencoding::decode(value) {
                Ok(decoded) => decoded.into_owned(),
                Err(e) => {
                    warn!(param, error = %e, "Ignoring undecodable directive value");
                    continue;
                }
            };

            let names: Vec<&str> = value.split(',').map(str::trim).filter(|n| !n.is_empty()).collect();
            if names.contains(&ALL_SERVERS) {
                let mut all: Vec<&str> = configured.iter().map(AsRef::as_ref).collect();
                all.sort_unstable();
                for name in all {
                    directive.push(name);
                }
            } else {
                for name in names {
                    directive.push(name);
                }
            }
        }

        directive
    }

    fn push(&mut self, name: &str) {
        if !self.servers.iter().any(|s| s == name) {
            self.servers.push(name.to_string());
        }
    }
}

/// Split a model string into the logical model id and its directive suffix, if any.
pub fn split_model(model: &str) -> (&str, Option<&str>) {
    match model.split_once('?') {
        Some((id, directive)) => (id, Some(directive)),
        None => (model, None),
    }
}

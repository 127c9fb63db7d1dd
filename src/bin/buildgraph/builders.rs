//! Maps a `[[builders]]` entry's `key` to a compiled-in [`Builder`]. The
//! build-script bootstrap pipeline that would normally let embedders supply
//! arbitrary builder code is out of scope here; this registry covers the
//! builder kinds this binary ships with.

use std::rc::Rc;

use buildgraph::builder::{Builder, CopyBuilder};
use buildgraph::error::BuildGraphError;

use buildgraph::config::BuilderConfig;

pub fn build_from_config(config: &BuilderConfig) -> Result<Rc<dyn Builder>, BuildGraphError> {
    match config.key.as_str() {
        "copy" => {
            let from = config
                .options
                .get("from")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BuildGraphError::CannotBuild {
                    reason: format!("builder `{}` (kind `copy`) requires options.from", config.key),
                })?;
            let to = config
                .options
                .get("to")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BuildGraphError::CannotBuild {
                    reason: format!("builder `{}` (kind `copy`) requires options.to", config.key),
                })?;
            Ok(Rc::new(CopyBuilder::new(from.to_string(), to.to_string())))
        }
        other => Err(BuildGraphError::CannotBuild {
            reason: format!("unknown builder kind `{other}`"),
        }),
    }
}

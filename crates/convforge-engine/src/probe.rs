//! ffprobe-based population of resource and sequence parameters.

use std::path::Path;

use convforge_common::{CleanupPolicy, ContextKind, Error, Result, Scope};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::context::ContextStore;
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;

/// Registry name of the probing tool.
pub const FFPROBE: &str = "ffprobe";

/// Resource parameter naming the essence file to probe.
pub const ESSENCE_PARAM: &str = "essence";

/// Every parameter the probe may set.
pub const PROBED_PARAMS: [&str; 8] = [
    "codec",
    "duration",
    "width",
    "height",
    "frame_rate",
    "channels",
    "sample_rate",
    "channel_layout",
];

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    duration: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    channel_layout: Option<String>,
}

/// Turn ffprobe JSON into parameter pairs, from the first stream only.
pub fn parse_ffprobe_json(json: &str) -> Result<Vec<(&'static str, String)>> {
    let output: FfprobeOutput = serde_json::from_str(json)?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| Error::Probe("no streams found".to_string()))?;

    let mut params = Vec::new();
    if let Some(codec) = stream.codec_name {
        params.push(("codec", codec));
    }
    let duration = stream
        .duration
        .or_else(|| output.format.and_then(|f| f.duration));
    if let Some(duration) = duration {
        params.push(("duration", duration));
    }

    match stream.codec_type.as_deref() {
        Some("video") => {
            if let Some(w) = stream.width {
                params.push(("width", w.to_string()));
            }
            if let Some(h) = stream.height {
                params.push(("height", h.to_string()));
            }
            if let Some(rate) = stream.r_frame_rate {
                params.push(("frame_rate", rate));
            }
        }
        Some("audio") => {
            if let Some(c) = stream.channels {
                params.push(("channels", c.to_string()));
            }
            if let Some(rate) = stream.sample_rate {
                params.push(("sample_rate", rate));
            }
            if let Some(layout) = stream.channel_layout {
                params.push(("channel_layout", layout));
            }
        }
        _ => {}
    }

    Ok(params)
}

/// Probe one file.
pub async fn probe_file(ffprobe: &Path, file: &Path) -> Result<Vec<(&'static str, String)>> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(file)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound(ffprobe.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;

    if !output.status.success() {
        return Err(Error::Probe(format!(
            "ffprobe failed on {} with {}: {}",
            file.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let json = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_json(&json)
        .map_err(|e| Error::Probe(format!("{}: {e}", file.display())))
}

/// Probe every resource with an essence file and fill in its parameters,
/// then copy probed values up to sequences that lack them.
///
/// Values already present in the store are never overwritten. Returns the
/// number of probed resources.
///
/// ffprobe is looked up in `tools` only once a resource with an essence
/// turns up, so a package without essences needs no ffprobe.
pub async fn populate(
    store: &mut ContextStore,
    tools: &ToolRegistry,
    workspace: &Workspace,
) -> Result<usize> {
    let mut probed = 0;

    for segment in store.segments().to_vec() {
        for (seq_type, sequence) in store.sequences() {
            for resource in store.resource_ids(segment, seq_type, sequence) {
                let scope = Scope::global()
                    .with_segment(segment)
                    .with_sequence(seq_type, sequence)
                    .with_resource(resource);

                let essence = store.get_parameter(ContextKind::Resource, &scope, ESSENCE_PARAM);
                let path = match essence {
                    Ok(essence) => workspace.resolve(&*essence),
                    Err(_) => continue,
                };
                debug!(%scope, path = %path.display(), "probing essence");

                let ffprobe = tools.require(FFPROBE)?;
                for (name, value) in probe_file(ffprobe, &path).await? {
                    if !store.has_parameter(ContextKind::Resource, &scope, name) {
                        store.add_parameter(
                            ContextKind::Resource,
                            &scope,
                            name,
                            value,
                            CleanupPolicy::Keep,
                        )?;
                    }
                }
                probed += 1;
            }
        }
    }

    inherit_sequence_params(store)?;
    info!(resources = probed, "probe complete");
    Ok(probed)
}

/// Copy probed parameters from each sequence's first resource.
pub fn inherit_sequence_params(store: &mut ContextStore) -> Result<()> {
    for (seq_type, sequence) in store.sequences() {
        let first = store.segments().iter().find_map(|&segment| {
            store
                .resource_ids(segment, seq_type, sequence)
                .first()
                .map(|&r| (segment, r))
        });
        let Some((segment, resource)) = first else {
            continue;
        };

        let seq_scope = Scope::global().with_sequence(seq_type, sequence);
        let res_scope = seq_scope.with_segment(segment).with_resource(resource);

        for name in PROBED_PARAMS {
            if store.has_parameter(ContextKind::Sequence, &seq_scope, name) {
                continue;
            }
            let value = match store.get_parameter(ContextKind::Resource, &res_scope, name) {
                Ok(v) => v.into_owned(),
                Err(_) => continue,
            };
            store.add_parameter(
                ContextKind::Sequence,
                &seq_scope,
                name,
                value,
                CleanupPolicy::Keep,
            )?;
        }
    }
    Ok(())
}

//! Audio channel layouts and ffmpeg `pan` mapping derivation.
//!
//! Audio sequences act as input tracks, merged in sequence order into one
//! stream whose channels are numbered consecutively. A mapping assigns one
//! merged channel (or silence) to every position of the target layout.

use std::fmt;
use std::str::FromStr;

use convforge_common::{ContextKind, Error, Result, Scope, SequenceType};

use crate::context::ContextStore;

/// Parameters that must match across the resources of an audio sequence.
pub const AUDIO_HOMOGENEOUS_PARAMS: [&str; 3] = ["channels", "channel_layout", "sample_rate"];

/// A named target layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub name: &'static str,
    pub channels: usize,
}

const LAYOUTS: &[(&str, usize)] = &[
    ("mono", 1),
    ("stereo", 2),
    ("downmix", 2),
    ("2.1", 3),
    ("3.0", 3),
    ("3.0(back)", 3),
    ("4.0", 4),
    ("quad", 4),
    ("quad(side)", 4),
    ("3.1", 4),
    ("2.2", 4),
    ("5.0", 5),
    ("5.0(side)", 5),
    ("4.1", 5),
    ("5.1", 6),
    ("5.1(side)", 6),
    ("6.0", 6),
    ("6.0(front)", 6),
    ("hexagonal", 6),
    ("6.1", 7),
    ("6.1(back)", 7),
    ("6.1(front)", 7),
    ("7.0", 7),
    ("7.0(front)", 7),
    ("7.1", 8),
    ("7.1(wide)", 8),
    ("7.1(wide-side)", 8),
    ("octagonal", 8),
];

impl ChannelLayout {
    /// Look up an ffmpeg layout name.
    pub fn from_name(name: &str) -> Option<Self> {
        LAYOUTS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(name, channels)| Self { name, channels })
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// What feeds one output position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    /// Channel `channel` of track `track`, both 1-based.
    Source { track: usize, channel: usize },
    Silence,
}

impl FromStr for OutputChannel {
    type Err = Error;

    /// `"T:C"` or `"silence"`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("silence") {
            return Ok(Self::Silence);
        }
        let parse = |part: &str| part.trim().parse::<usize>().ok().filter(|n| *n > 0);
        s.split_once(':')
            .and_then(|(t, c)| Some((parse(t)?, parse(c)?)))
            .map(|(track, channel)| Self::Source { track, channel })
            .ok_or_else(|| {
                Error::config(format!(
                    "invalid channel mapping entry '{s}', expected TRACK:CHANNEL or silence"
                ))
            })
    }
}

/// Fill the layout's positions from the tracks in order.
///
/// Surplus input channels are ignored; missing ones are silenced.
pub fn default_mapping(track_channels: &[usize], layout: &ChannelLayout) -> Vec<OutputChannel> {
    let sources = track_channels
        .iter()
        .enumerate()
        .flat_map(|(t, &n)| {
            (1..=n).map(move |c| OutputChannel::Source {
                track: t + 1,
                channel: c,
            })
        });

    sources
        .chain(std::iter::repeat(OutputChannel::Silence))
        .take(layout.channels)
        .collect()
}

/// Render a mapping as an ffmpeg `pan` filter argument.
///
/// Output position `i` becomes `ci=cK`, where `K` is the source channel's
/// offset in the merged input, or `ci=0*c0` when silent.
pub fn pan_parameter(
    track_channels: &[usize],
    layout: &ChannelLayout,
    mapping: &[OutputChannel],
) -> Result<String> {
    if mapping.len() != layout.channels {
        return Err(Error::config(format!(
            "layout {layout} needs {} channels, mapping has {}",
            layout.channels,
            mapping.len()
        )));
    }

    let mut out = format!("{}c", layout.channels);
    for (i, entry) in mapping.iter().enumerate() {
        match *entry {
            OutputChannel::Silence => out.push_str(&format!("|c{i}=0*c0")),
            OutputChannel::Source { track, channel } => {
                let available = track_channels.get(track.wrapping_sub(1)).copied();
                match available {
                    Some(n) if channel <= n => {
                        let offset: usize = track_channels[..track - 1].iter().sum();
                        out.push_str(&format!("|c{i}=c{}", offset + channel - 1));
                    }
                    Some(n) => {
                        return Err(Error::config(format!(
                            "track {track} has {n} channels, mapping asks for channel {channel}"
                        )))
                    }
                    None => {
                        return Err(Error::config(format!(
                            "mapping refers to track {track}, only {} tracks exist",
                            track_channels.len()
                        )))
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Channel counts of every audio sequence, in sequence order.
///
/// Read from the sequence parameter `channels`.
pub fn track_channels(store: &ContextStore) -> Result<Vec<usize>> {
    store
        .sequence_ids(SequenceType::Audio)
        .into_iter()
        .map(|id| {
            let scope = Scope::global().with_sequence(SequenceType::Audio, id);
            let value = store.get_parameter(ContextKind::Sequence, &scope, "channels")?;
            value.trim().parse::<usize>().map_err(|_| {
                Error::config(format!(
                    "audio sequence {id} reports a non-numeric channel count '{value}'"
                ))
            })
        })
        .collect()
}

/// Check every audio sequence for matching channel count, layout and
/// sample rate across its resources.
pub fn check_audio_homogeneity(store: &ContextStore) -> Result<()> {
    for id in store.sequence_ids(SequenceType::Audio) {
        store.check_homogeneous(SequenceType::Audio, id, &AUDIO_HOMOGENEOUS_PARAMS)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convforge_common::{CleanupPolicy, ResourceId, SegmentId, SequenceId};

    fn src(track: usize, channel: usize) -> OutputChannel {
        OutputChannel::Source { track, channel }
    }

    #[test]
    fn test_layout_names() {
        assert_eq!(ChannelLayout::from_name("5.1").unwrap().channels, 6);
        assert_eq!(ChannelLayout::from_name("Stereo").unwrap().channels, 2);
        assert!(ChannelLayout::from_name("22.2").is_none());
    }

    #[test]
    fn test_pan_swaps_first_pair_for_any_four_channel_layout() {
        let mapping: Vec<OutputChannel> = ["1:2", "1:1", "2:2", "silence"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();

        for name in ["quad", "4.0", "3.1", "2.2"] {
            let layout = ChannelLayout::from_name(name).unwrap();
            assert_eq!(
                pan_parameter(&[2, 2], &layout, &mapping).unwrap(),
                "4c|c0=c1|c1=c0|c2=c3|c3=0*c0",
                "layout {name}"
            );
        }
    }

    #[test]
    fn test_default_mapping_deficit() {
        let layout = ChannelLayout::from_name("quad").unwrap();
        assert_eq!(
            default_mapping(&[2], &layout),
            vec![
                src(1, 1),
                src(1, 2),
                OutputChannel::Silence,
                OutputChannel::Silence
            ]
        );
    }

    #[test]
    fn test_default_mapping_surplus() {
        let layout = ChannelLayout::from_name("4.0").unwrap();
        assert_eq!(
            default_mapping(&[10], &layout),
            vec![src(1, 1), src(1, 2), src(1, 3), src(1, 4)]
        );
    }

    #[test]
    fn test_default_mapping_spans_tracks() {
        let layout = ChannelLayout::from_name("5.1").unwrap();
        let mapping = default_mapping(&[2, 2, 2], &layout);
        assert_eq!(
            pan_parameter(&[2, 2, 2], &layout, &mapping).unwrap(),
            "6c|c0=c0|c1=c1|c2=c2|c3=c3|c4=c4|c5=c5"
        );
    }

    #[test]
    fn test_bad_mappings() {
        assert!("0:1".parse::<OutputChannel>().is_err());
        assert!("left".parse::<OutputChannel>().is_err());

        let stereo = ChannelLayout::from_name("stereo").unwrap();
        assert!(pan_parameter(&[2], &stereo, &[src(1, 1)]).is_err());
        assert!(pan_parameter(&[2], &stereo, &[src(1, 1), src(1, 3)]).is_err());
        assert!(pan_parameter(&[2], &stereo, &[src(1, 1), src(2, 1)]).is_err());
    }

    fn audio_store(values: &[(&str, &str)]) -> ContextStore {
        let mut store = ContextStore::new();
        let seq = SequenceId::new();
        store.add_sequence(SequenceType::Audio, seq);

        for (channels, layout) in values {
            let segment = SegmentId::new();
            let resource = ResourceId::new();
            store.add_segment(segment);
            store
                .add_resource(segment, SequenceType::Audio, seq, resource)
                .unwrap();
            let scope = Scope::global()
                .with_segment(segment)
                .with_sequence(SequenceType::Audio, seq)
                .with_resource(resource);
            for (name, value) in [("channels", *channels), ("channel_layout", *layout)] {
                store
                    .add_parameter(ContextKind::Resource, &scope, name, value, CleanupPolicy::Keep)
                    .unwrap();
            }
        }
        store
    }

    #[test]
    fn test_homogeneous_audio_passes() {
        let store = audio_store(&[("2", "stereo"), ("2", "stereo")]);
        check_audio_homogeneity(&store).unwrap();
    }

    #[test]
    fn test_inhomogeneous_layout_fails() {
        let store = audio_store(&[("2", "stereo"), ("2", "downmix")]);
        let err = check_audio_homogeneity(&store).unwrap_err();
        assert!(matches!(err, Error::Homogeneity { .. }));
        assert!(err.to_string().contains("channel_layout"));
    }

    #[test]
    fn test_inhomogeneous_channel_count_fails() {
        let store = audio_store(&[("2", "stereo"), ("6", "stereo")]);
        let err = check_audio_homogeneity(&store).unwrap_err();
        assert!(err.to_string().contains("channels differs"));
    }

    #[test]
    fn test_track_channels_reads_sequences() {
        let mut store = ContextStore::new();
        for n in ["2", "6"] {
            let seq = SequenceId::new();
            store.add_sequence(SequenceType::Audio, seq);
            store
                .add_parameter(
                    ContextKind::Sequence,
                    &Scope::global().with_sequence(SequenceType::Audio, seq),
                    "channels",
                    n,
                    CleanupPolicy::Keep,
                )
                .unwrap();
        }
        assert_eq!(track_channels(&store).unwrap(), vec![2, 6]);
    }
}

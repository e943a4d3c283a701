//! Song metadata
//!
//! Tags travel with chunks so that client-observable metadata changes
//! line up with audible transitions. Besides the usual text items a
//! tag carries the replay-gain measurements and the MixRamp loudness
//! profile used to align cross-fades.

use std::time::Duration;

use cadenza_common::ReplayGainInfo;

/// Kinds of text metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Artist,
    AlbumArtist,
    Album,
    Title,
    Track,
    Genre,
    Date,
    Comment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagItem {
    pub kind: TagKind,
    pub value: String,
}

/// One point of a MixRamp loudness profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampPoint {
    /// Peak-relative level in dB at this point.
    pub db: f32,
    /// Seconds from the relevant edge of the song.
    pub seconds: f32,
}

/// MixRamp analysis data: loudness profiles at the start and end of a
/// song, as `"db seconds;db seconds;..."` lists in its tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixRampInfo {
    pub start: Vec<RampPoint>,
    pub end: Vec<RampPoint>,
}

impl MixRampInfo {
    pub fn is_defined(&self) -> bool {
        !self.start.is_empty() && !self.end.is_empty()
    }

    /// Parse a `"db seconds;db seconds;..."` list. Malformed entries
    /// end the list, matching the analysis tools' output convention.
    pub fn parse_ramp(list: &str) -> Vec<RampPoint> {
        let mut points = Vec::new();
        for entry in list.split(';') {
            let mut parts = entry.split_whitespace();
            let (Some(db), Some(seconds)) = (parts.next(), parts.next()) else {
                break;
            };
            let (Ok(db), Ok(seconds)) = (db.parse(), seconds.parse()) else {
                break;
            };
            points.push(RampPoint { db, seconds });
        }
        points
    }

    /// Find the time at which `ramp` crosses `required_db`, linearly
    /// interpolating between neighboring points. `None` when the
    /// profile never reaches that level.
    pub fn interpolate(ramp: &[RampPoint], required_db: f32) -> Option<f32> {
        let mut last: Option<RampPoint> = None;
        for &p in ramp {
            if (p.db - required_db).abs() < f32::EPSILON {
                return Some(p.seconds);
            }
            if let Some(l) = last {
                let (lo, hi) = if l.db < p.db { (l, p) } else { (p, l) };
                if required_db > lo.db && required_db < hi.db {
                    let frac = (required_db - lo.db) / (hi.db - lo.db);
                    return Some(lo.seconds + frac * (hi.seconds - lo.seconds));
                }
            }
            last = Some(p);
        }
        None
    }
}

/// Metadata of one song, assembled by the decoder and the library.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub items: Vec<TagItem>,

    /// Duration as declared by the container, if known.
    pub duration: Option<Duration>,

    pub replay_gain: Option<ReplayGainInfo>,

    pub mixramp: MixRampInfo,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, kind: TagKind, value: impl Into<String>) {
        self.items.push(TagItem { kind, value: value.into() });
    }

    pub fn get(&self, kind: TagKind) -> Option<&str> {
        self.items.iter().find(|i| i.kind == kind).map(|i| i.value.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        self.get(TagKind::Title)
    }

    pub fn artist(&self) -> Option<&str> {
        self.get(TagKind::Artist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ramp() {
        let points = MixRampInfo::parse_ramp("-60.00 0.00;-30.00 1.50;-10.00 3.00");
        assert_eq!(points.len(), 3);
        assert_eq!(points[1].db, -30.0);
        assert_eq!(points[1].seconds, 1.5);
    }

    #[test]
    fn test_parse_stops_at_garbage() {
        let points = MixRampInfo::parse_ramp("-60.00 0.00;bogus;-10.00 3.00");
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_interpolate_exact_and_between() {
        let ramp = MixRampInfo::parse_ramp("-60.00 0.00;-30.00 1.00;-10.00 3.00");

        assert_eq!(MixRampInfo::interpolate(&ramp, -30.0), Some(1.0));

        // halfway between -30 and -10 dB
        let t = MixRampInfo::interpolate(&ramp, -20.0).unwrap();
        assert!((t - 2.0).abs() < 1e-6);

        assert_eq!(MixRampInfo::interpolate(&ramp, -5.0), None);
    }

    #[test]
    fn test_tag_items() {
        let mut tag = Tag::new();
        tag.add_item(TagKind::Artist, "Orchestre National");
        tag.add_item(TagKind::Title, "Gymnopédie No.1");
        assert_eq!(tag.artist(), Some("Orchestre National"));
        assert_eq!(tag.title(), Some("Gymnopédie No.1"));
        assert_eq!(tag.get(TagKind::Album), None);
    }
}

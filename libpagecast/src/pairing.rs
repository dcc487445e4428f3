//! Content pairing engine
//!
//! Matches a batch of uploaded media against a batch of captions and
//! produces the paired units the bulk scheduler consumes. Three policies:
//!
//! - `filename`: media and captions are grouped by the first digit run in
//!   their filenames ("promo1a.jpg" and "cap1.txt" share key "1"); media
//!   groups with more than one member become carousels.
//! - `order`: the i-th media item is paired with the i-th caption.
//! - `manual`: each media item takes the operator-entered caption at its
//!   index.
//!
//! Media that cannot be paired (orphaned groups, blank captions) produces no
//! unit. Those drops are intentional, and they are reported back as skipped
//! items rather than disappearing silently.

use serde::{Deserialize, Serialize};

use crate::types::{MediaRef, PostKind};

/// An uploaded media file entering the pairing engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaItem {
    /// Caller-assigned id, referenced by carousel groupings.
    pub id: String,
    pub filename: String,
    pub media: MediaRef,
}

/// An uploaded caption file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptionItem {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PairingMethod {
    Filename,
    Order,
    Manual,
}

impl PairingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingMethod::Filename => "filename",
            PairingMethod::Order => "order",
            PairingMethod::Manual => "manual",
        }
    }
}

/// One caption bound to one or more media items, ready to become a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedUnit {
    pub kind: PostKind,
    pub media: Vec<MediaItem>,
    pub caption: String,
    pub method: PairingMethod,
    /// The numeric filename token, for filename pairing.
    pub group_key: Option<String>,
}

/// Why a media item produced no unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No caption file shared the media group's key.
    UnmatchedGroup { key: String },
    /// The caption file matching the group was blank.
    BlankCaptionFile { key: String },
    /// The caption at this position was blank or missing.
    BlankCaption { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMedia {
    pub filenames: Vec<String>,
    pub reason: SkipReason,
}

/// The full result of a pairing run.
#[derive(Debug, Clone, Default)]
pub struct PairingOutcome {
    pub units: Vec<PairedUnit>,
    pub skipped: Vec<SkippedMedia>,
}

impl PairingOutcome {
    fn skip(&mut self, media: &[&MediaItem], reason: SkipReason) {
        self.skipped.push(SkippedMedia {
            filenames: media.iter().map(|m| m.filename.clone()).collect(),
            reason,
        });
    }
}

/// Grouping key used when a filename carries no digits.
pub const NO_NUMBER_KEY: &str = "no_number";

/// Extract the first run of ASCII digits from a filename.
pub fn numeric_token(filename: &str) -> Option<String> {
    let mut token = String::new();
    for c in filename.chars() {
        if c.is_ascii_digit() {
            token.push(c);
        } else if !token.is_empty() {
            break;
        }
    }
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Pair media with captions under the given method.
///
/// `manual_captions` is only read in manual mode; `carousel_groups` (lists
/// of media ids that form one carousel) applies to order and manual modes —
/// filename mode groups automatically.
pub fn pair(
    media: &[MediaItem],
    captions: &[CaptionItem],
    method: PairingMethod,
    manual_captions: &[String],
    carousel_groups: &[Vec<String>],
) -> PairingOutcome {
    let outcome = match method {
        PairingMethod::Filename => pair_by_numeric_token(media, captions),
        PairingMethod::Order => pair_by_order(media, captions, carousel_groups),
        PairingMethod::Manual => pair_with_manual_captions(media, manual_captions, carousel_groups),
    };

    tracing::info!(
        method = method.as_str(),
        units = outcome.units.len(),
        skipped = outcome.skipped.len(),
        "Paired media batch"
    );
    outcome
}

fn pair_by_numeric_token(media: &[MediaItem], captions: &[CaptionItem]) -> PairingOutcome {
    let mut outcome = PairingOutcome::default();

    // Group media by token, preserving first-appearance order of the keys.
    let mut key_order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<&MediaItem>> =
        std::collections::HashMap::new();
    for item in media {
        let key = numeric_token(&item.filename).unwrap_or_else(|| NO_NUMBER_KEY.to_string());
        if !groups.contains_key(&key) {
            key_order.push(key.clone());
        }
        groups.entry(key).or_default().push(item);
    }

    // Captions by token; a later caption with the same key wins.
    let mut caption_by_key: std::collections::HashMap<String, &CaptionItem> =
        std::collections::HashMap::new();
    for caption in captions {
        let key = numeric_token(&caption.filename).unwrap_or_else(|| NO_NUMBER_KEY.to_string());
        caption_by_key.insert(key, caption);
    }

    for key in key_order {
        let group = &groups[&key];
        match caption_by_key.get(&key) {
            None => outcome.skip(group, SkipReason::UnmatchedGroup { key: key.clone() }),
            Some(caption) if caption.content.trim().is_empty() => {
                outcome.skip(group, SkipReason::BlankCaptionFile { key: key.clone() })
            }
            Some(caption) => outcome.units.push(PairedUnit {
                kind: if group.len() > 1 {
                    PostKind::Carousel
                } else {
                    PostKind::Single
                },
                media: group.iter().map(|m| (*m).clone()).collect(),
                caption: caption.content.clone(),
                method: PairingMethod::Filename,
                group_key: Some(key.clone()),
            }),
        }
    }

    outcome
}

/// Resolve the carousel group containing `id`, returning its members in the
/// group's declared order. Ids that match no uploaded media are ignored.
fn resolve_group<'a>(
    media: &'a [MediaItem],
    carousel_groups: &[Vec<String>],
    id: &str,
) -> Option<Vec<&'a MediaItem>> {
    let group = carousel_groups.iter().find(|g| g.iter().any(|m| m == id))?;
    let members: Vec<&MediaItem> = group
        .iter()
        .filter_map(|member_id| media.iter().find(|m| &m.id == member_id))
        .collect();
    if members.is_empty() {
        None
    } else {
        Some(members)
    }
}

fn pair_by_order(
    media: &[MediaItem],
    captions: &[CaptionItem],
    carousel_groups: &[Vec<String>],
) -> PairingOutcome {
    let mut outcome = PairingOutcome::default();
    let mut consumed: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let max_pairs = media.len().min(captions.len());

    for i in 0..max_pairs {
        let item = &media[i];
        if consumed.contains(item.id.as_str()) {
            continue;
        }

        let members = resolve_group(media, carousel_groups, &item.id)
            .unwrap_or_else(|| vec![item]);
        for member in &members {
            consumed.insert(member.id.as_str());
        }

        let caption = captions[i].content.clone();
        if caption.trim().is_empty() {
            outcome.skip(&members, SkipReason::BlankCaption { index: i });
            continue;
        }

        outcome.units.push(PairedUnit {
            kind: if members.len() > 1 {
                PostKind::Carousel
            } else {
                PostKind::Single
            },
            media: members.iter().map(|m| (*m).clone()).collect(),
            caption,
            method: PairingMethod::Order,
            group_key: None,
        });
    }

    outcome
}

fn pair_with_manual_captions(
    media: &[MediaItem],
    manual_captions: &[String],
    carousel_groups: &[Vec<String>],
) -> PairingOutcome {
    let mut outcome = PairingOutcome::default();
    let mut consumed: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for (i, item) in media.iter().enumerate() {
        if consumed.contains(item.id.as_str()) {
            continue;
        }

        let caption = manual_captions.get(i).map(String::as_str).unwrap_or("");
        if caption.trim().is_empty() {
            outcome.skip(&[item], SkipReason::BlankCaption { index: i });
            continue;
        }

        let members = resolve_group(media, carousel_groups, &item.id)
            .unwrap_or_else(|| vec![item]);
        for member in &members {
            consumed.insert(member.id.as_str());
        }

        outcome.units.push(PairedUnit {
            kind: if members.len() > 1 {
                PostKind::Carousel
            } else {
                PostKind::Single
            },
            media: members.iter().map(|m| (*m).clone()).collect(),
            caption: caption.to_string(),
            method: PairingMethod::Manual,
            group_key: None,
        });
    }

    outcome
}

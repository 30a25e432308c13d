//! Minimal tagged shapes for the handful of firehose record payloads this
//! system actually inspects. Everything else in a decoded record is opaque
//! and ignored — these types exist to find one outbound link and to answer
//! "does this record carry a link at all", not to model the full schema of
//! a social-network post.

use serde::Deserialize;

/// A decoded `app.bsky.feed.post` record, trimmed to the fields the link
/// extractor and pre-filter need.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub embed: Option<Embed>,
    #[serde(default)]
    pub facets: Vec<Facet>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    #[serde(rename = "app.bsky.embed.external")]
    External { external: ExternalEmbed },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia { media: Box<Embed> },
    /// Every other embed shape (`app.bsky.embed.images`,
    /// `app.bsky.embed.record`, `app.bsky.embed.video`, …) carries no link
    /// this system extracts.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalEmbed {
    pub uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Facet {
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(other)]
    Other,
}

/// Legacy pre-facet link annotation.
#[derive(Debug, Clone, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

/// A decoded `app.bsky.feed.repost` record, trimmed to the one field the
/// repost path needs.
#[derive(Debug, Clone, Deserialize)]
pub struct RepostRecord {
    pub subject: RepostSubject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepostSubject {
    pub uri: String,
}

impl PostRecord {
    /// Cheap link-bearing pre-filter: true if any of the four structured
    /// indications are present, or the raw text contains a bare
    /// `http://`/`https://` substring. `app.bsky.embed.record` (a bare
    /// quote-post with no media) is never treated as link-bearing here.
    pub fn has_link_indication(&self) -> bool {
        let facet_link = self.facets.iter().any(|facet| {
            facet
                .features
                .iter()
                .any(|feature| matches!(feature, FacetFeature::Link { .. }))
        });
        if facet_link {
            return true;
        }

        if self.entities.iter().any(|e| e.kind == "link") {
            return true;
        }

        match &self.embed {
            Some(Embed::External { .. }) => return true,
            Some(Embed::RecordWithMedia { media }) if matches!(**media, Embed::External { .. }) => {
                return true;
            }
            _ => {}
        }

        self.text.contains("http://") || self.text.contains("https://")
    }
}

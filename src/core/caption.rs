//! Caption templates.
//!
//! Placeholders like `{title}` are replaced from the item and the
//! requesting user; unknown placeholders are left as they are.

use crate::domain::{ContentItem, DeliveryContext, LinkPair, MediaKind, Track};

pub const TRACK_TEMPLATE: &str = "🎵 {title}\n👤 {artist}\n🎧 {provider}";
pub const VIDEO_TEMPLATE: &str = "🎬 {title}\n👤 {artist}\n🎧 {provider} Music Video";
pub const ALBUM_TEMPLATE: &str = "💿 {album}\n👤 {artist}\n🎧 {provider}";
pub const ARTIST_TEMPLATE: &str = "👤 {artist}\n🎧 {provider} Discography";
pub const PLAYLIST_TEMPLATE: &str = "🎶 {title}\n👤 Curated by {artist}\n🎧 {provider} Playlist";

const VARIOUS_ARTISTS: &str = "Various Artists";

/// Replace every `{key}` in `template` with its value
pub fn format_template(template: &str, fields: &[(&str, String)]) -> String {
    let mut text = template.to_string();
    for (key, value) in fields {
        text = text.replace(&format!("{{{}}}", key), value);
    }
    text
}

/// "apple music" -> "Apple Music"
pub fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn user_fields(ctx: &DeliveryContext) -> Vec<(&'static str, String)> {
    let name = ctx.user_name.clone().unwrap_or_default();
    vec![("user", name.clone()), ("username", name)]
}

fn track_fields(track: &Track) -> Vec<(&'static str, String)> {
    vec![
        ("title", track.title.clone()),
        ("artist", track.artist.clone()),
        ("album", track.album.clone().unwrap_or_default()),
        ("provider", title_case(&track.provider)),
        ("duration", track.duration.to_string()),
        ("extension", track.file_extension.clone()),
        (
            "tracknumber",
            track.track_number.map(|n| n.to_string()).unwrap_or_default(),
        ),
    ]
}

/// Caption for a single track
pub fn track_caption(track: &Track, ctx: &DeliveryContext) -> String {
    let template = match track.media {
        MediaKind::Audio => TRACK_TEMPLATE,
        MediaKind::Video => VIDEO_TEMPLATE,
    };
    let mut fields = track_fields(track);
    fields.extend(user_fields(ctx));
    format_template(template, &fields)
}

/// Caption for any item, using the per-kind template
pub fn caption_for(item: &ContentItem, ctx: &DeliveryContext) -> String {
    let (template, mut fields) = match item {
        ContentItem::Track(track) => return track_caption(track, ctx),
        ContentItem::Album(album) => (
            ALBUM_TEMPLATE,
            vec![
                ("title", album.title.clone()),
                ("album", album.title.clone()),
                ("artist", album.artist.clone()),
                ("provider", title_case(&album.provider)),
                ("totaltracks", album.tracks.len().to_string()),
            ],
        ),
        ContentItem::Artist(artist) => (
            ARTIST_TEMPLATE,
            vec![
                ("title", artist.title.clone()),
                ("artist", artist.title.clone()),
                ("provider", title_case(&artist.provider)),
            ],
        ),
        ContentItem::Playlist(playlist) => (
            PLAYLIST_TEMPLATE,
            vec![
                ("title", playlist.title.clone()),
                (
                    "artist",
                    playlist
                        .artist
                        .clone()
                        .unwrap_or_else(|| VARIOUS_ARTISTS.to_string()),
                ),
                ("provider", title_case(&playlist.provider)),
                ("totaltracks", playlist.tracks.len().to_string()),
            ],
        ),
    };
    fields.extend(user_fields(ctx));
    format_template(template, &fields)
}

/// Append the available links to a caption
pub fn with_links(caption: &str, links: &LinkPair) -> String {
    let mut text = caption.to_string();
    if let Some(direct) = &links.direct {
        text.push_str(&format!("\n🔗 Direct Link: {}", direct));
    }
    if let Some(index) = &links.index {
        text.push_str(&format!("\n📁 Index Link: {}", index));
    }
    text
}

/// Caption for part `part` of `total` archive parts
pub fn part_caption(caption: &str, part: usize, total: usize) -> String {
    if total <= 1 {
        caption.to_string()
    } else {
        format!("{}\n📦 Part {}/{}", caption, part, total)
    }
}

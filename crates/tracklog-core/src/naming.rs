//! Human-readable labels derived from upload keys.
//!
//! Names are cosmetic: two keys may share one, and a name never grants access.

pub const FALLBACK_NAME: &str = "upload";
pub const NAME_WORD_COUNT: usize = 4;

const NAME_WORDS: &[&str] = &[
    "correct",
    "battery",
    "horse",
    "staple",
    "amber",
    "beacon",
    "celestial",
    "delta",
    "ember",
    "fable",
    "galaxy",
    "harbor",
    "ionic",
    "jungle",
    "keystone",
    "lantern",
    "meadow",
    "nebula",
    "opal",
    "prairie",
    "quartz",
    "ripple",
    "solstice",
    "tundra",
    "uplink",
    "voyage",
    "whisper",
    "xenon",
    "yonder",
    "zephyr",
    "aurora",
    "cascade",
    "dawn",
    "evergreen",
    "frost",
    "glimmer",
    "horizon",
    "island",
    "juniper",
    "kestrel",
    "lilac",
    "meridian",
    "nimbus",
    "onyx",
    "pioneer",
    "quiver",
    "resonance",
    "saffron",
    "topaz",
];

/// Maps each big-endian 16-bit slice of the decoded key onto the word list.
pub fn name_for(key: &str) -> String {
    let normalized = key.trim().to_ascii_lowercase();
    let bytes = match hex::decode(normalized) {
        Ok(bytes) if bytes.len() >= NAME_WORD_COUNT * 2 => bytes,
        _ => return FALLBACK_NAME.to_string(),
    };

    bytes
        .chunks_exact(2)
        .take(NAME_WORD_COUNT)
        .map(|pair| {
            let value = u16::from_be_bytes([pair[0], pair[1]]) as usize;
            NAME_WORDS[value % NAME_WORDS.len()]
        })
        .collect::<Vec<_>>()
        .join(" ")
}

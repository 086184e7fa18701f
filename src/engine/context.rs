//! One-hot context encoding for the session's active situational tags.
//!
//! Positions are a static bijection partitioned contiguously by category:
//! weather [0-4], time [5-8], season [9-12], intensity [13-17], mood [18-42].

pub const CONTEXT_DIM: usize = 43;

/// Index of a tag in the context vector, or None for an unknown tag.
pub fn tag_index(tag: &str) -> Option<usize> {
    let index = match tag {
        // weather
        "sunny" => 0,
        "cloudy" => 1,
        "raining" => 2,
        "snowy" => 3,
        "stormy" => 4,
        // time
        "morning" => 5,
        "afternoon" => 6,
        "evening" => 7,
        "night" => 8,
        // season
        "spring" => 9,
        "summer" => 10,
        "autumn" => 11,
        "winter" => 12,
        // intensity
        "chill" => 13,
        "tired" => 14,
        "exciting" => 15,
        "energetic" => 16,
        "intense" => 17,
        // mood
        "stressed" => 18,
        "motivated" => 19,
        "adventurous" => 20,
        "nostalgic" => 21,
        "romantic" => 22,
        "playful" => 23,
        "focused" => 24,
        "distracted" => 25,
        "inspired" => 26,
        "friendly" => 27,
        "shy" => 28,
        "curious" => 29,
        "analytical" => 30,
        "emotional" => 31,
        "burnt_out" => 32,
        "artistic" => 33,
        "practical" => 34,
        "hungry" => 35,
        "natural" => 36,
        "urban" => 37,
        "anxious" => 38,
        "overwhelmed" => 39,
        "upset" => 40,
        "happy" => 41,
        "festive" => 42,
        _ => return None,
    };
    Some(index)
}

/// Builds the 43-dimensional one-hot context vector for the active tag set.
///
/// Deterministic and order-independent. Unknown tags are ignored, not errors;
/// an empty set yields the zero vector.
pub fn encode(tags: &[String]) -> Vec<f64> {
    let mut vector = vec![0.0; CONTEXT_DIM];
    for tag in tags {
        if let Some(index) = tag_index(tag) {
            vector[index] = 1.0;
        }
    }
    vector
}

/*
    statify-rs | Rust CLI to explore your Spotify listening statistics.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Display helpers shared by the CLI tables and `Display` impls.

/// `185000` -> `3:05`
pub fn format_duration(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    format!("{}:{:02}", minutes, seconds)
}

/// Compact follower counts: `1.2M`, `3.4K`, `999`.
pub fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

pub fn feature_label(feature: &str) -> &str {
    match feature {
        "danceability" => "Danceability",
        "energy" => "Energy",
        "speechiness" => "Speechiness",
        "acousticness" => "Acousticness",
        "instrumentalness" => "Instrumentalness",
        "liveness" => "Liveness",
        "valence" => "Positivity",
        other => other,
    }
}

pub fn feature_description(feature: &str) -> &'static str {
    match feature {
        "danceability" => "How suitable a track is for dancing",
        "energy" => "Perceptual measure of intensity and power",
        "speechiness" => "Presence of spoken words in a track",
        "acousticness" => "Measure of whether the track is acoustic",
        "instrumentalness" => "Predicts whether a track contains no vocals",
        "liveness" => "Detects the presence of an audience",
        "valence" => "Musical positiveness conveyed by a track",
        _ => "",
    }
}

/// Text bar for a 0..1 value, `width` cells wide.
pub fn bar(value: f32, width: usize) -> String {
    let filled = ((value.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
    format!("{}{}", "#".repeat(filled), ".".repeat(width - filled))
}

/// Cuts `s` to `max` characters, marking the cut with `..`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(2)).collect();
        format!("{}..", kept)
    } else {
        s.to_string()
    }
}

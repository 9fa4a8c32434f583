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

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use log::debug;
use serde::Serialize;
use statify_core::config::data_dir;
use statify_core::format::{bar, feature_description, feature_label, format_duration, format_number, truncate};
use statify_core::{
    AuthStatus, FileStorage, Insights, MemoryStorage, QueryError, Session, SpotifyConfig, TimeRange,
};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "statify")]
#[command(about = "Explore your Spotify listening statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connects your Spotify account (OAuth authorization-code flow)
    Login,
    /// Removes stored tokens, profile and cached data
    Logout,
    /// Shows whether a stored session is still valid
    Status,
    /// Lists your top artists
    TopArtists {
        /// short_term (4 weeks), medium_term (6 months) or long_term (all time)
        #[arg(long, short = 'r', default_value = "medium_term")]
        range: TimeRange,
        #[arg(long, short = 'n', default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=50))]
        limit: u32,
        /// Output the list to a JSON file (e.g., --json=artists.json)
        #[arg(long)]
        json: Option<String>,
    },
    /// Lists your top tracks
    TopTracks {
        #[arg(long, short = 'r', default_value = "medium_term")]
        range: TimeRange,
        #[arg(long, short = 'n', default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=50))]
        limit: u32,
        #[arg(long)]
        json: Option<String>,
    },
    /// Lists recently played tracks
    Recent {
        #[arg(long, short = 'n', default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=50))]
        limit: u32,
        #[arg(long)]
        json: Option<String>,
    },
    /// Shows the track playing right now, if any
    NowPlaying,
    /// Shows the audio features of a track
    Features {
        /// Track ID, spotify:track: URI or open.spotify.com link
        #[arg(value_name = "TRACK_ID")]
        track_id: String,
        #[arg(long)]
        json: Option<String>,
    },
    /// Average audio features of your top tracks
    Mood {
        #[arg(long, short = 'r', default_value = "medium_term")]
        range: TimeRange,
        #[arg(long)]
        json: Option<String>,
    },
    /// Breaks your top artists down by genre
    Genres {
        #[arg(long, short = 'r', default_value = "long_term")]
        range: TimeRange,
        #[arg(long)]
        json: Option<String>,
    },
    /// Summary of top artists, tracks and genres
    Overview {
        #[arg(long, short = 'r', default_value = "medium_term")]
        range: TimeRange,
        #[arg(long)]
        json: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    let session = match build_session() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Error initializing Spotify session: {:#}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Login => handle_login(&session).await,
        Commands::Logout => handle_logout(&session).await,
        Commands::Status => handle_status(&session).await,
        Commands::TopArtists { range, limit, json } => {
            handle_top_artists(Insights::new(session), range, limit, json.as_deref()).await
        }
        Commands::TopTracks { range, limit, json } => {
            handle_top_tracks(Insights::new(session), range, limit, json.as_deref()).await
        }
        Commands::Recent { limit, json } => {
            handle_recent(Insights::new(session), limit, json.as_deref()).await
        }
        Commands::NowPlaying => handle_now_playing(Insights::new(session)).await,
        Commands::Features { track_id, json } => {
            handle_features(Insights::new(session), &track_id, json.as_deref()).await
        }
        Commands::Mood { range, json } => {
            handle_mood(Insights::new(session), range, json.as_deref()).await
        }
        Commands::Genres { range, json } => {
            handle_genres(Insights::new(session), range, json.as_deref()).await
        }
        Commands::Overview { range, json } => {
            handle_overview(Insights::new(session), range, json.as_deref()).await
        }
    }
}

fn build_session() -> anyhow::Result<Session> {
    let config = SpotifyConfig::from_env()?;
    let dir = data_dir()?;
    debug!("Using data directory {}", dir.display());

    let local = Arc::new(FileStorage::in_dir(&dir));
    let session_storage = Arc::new(MemoryStorage::new());
    Session::from_config(Arc::new(config), local, session_storage)
        .context("Failed to create Spotify session")
}

/// Prints the error and exits. Authentication failures get a hint to log in again.
fn fail(context: &str, e: &QueryError) -> ! {
    eprintln!();
    eprintln!("[ERROR] {}: {}", context, e);
    if e.is_auth_failure() {
        eprintln!("You are not logged in or your session expired. Run 'statify login'.");
    }
    process::exit(1);
}

fn save_report<T: Serialize>(path: &str, report: &T) {
    match File::create(path) {
        Ok(mut file) => {
            let json_content = serde_json::to_string_pretty(report).unwrap_or_default();
            if let Err(e) = file.write_all(json_content.as_bytes()) {
                eprintln!();
                eprintln!("[ERROR] Failed to write report to file: {}", e);
            } else {
                println!();
                println!("[SAVED] Report saved to: {}", path);
            }
        }
        Err(e) => eprintln!("[ERROR] Failed to create file '{}': {}", path, e),
    }
}

async fn handle_login(session: &Session) {
    let url = match session.begin_login().await {
        Ok(url) => url,
        Err(e) => {
            eprintln!("[ERROR] Could not start login: {}", e);
            process::exit(1);
        }
    };

    println!("Open this URL in your browser to connect your Spotify account:");
    println!();
    println!("  {}", url);
    println!();
    print!("Then paste the URL you were redirected to: ");
    let _ = io::stdout().flush();

    let mut line = String::new();
    if let Err(e) = io::stdin().lock().read_line(&mut line) {
        eprintln!("[ERROR] Failed to read the callback URL: {}", e);
        process::exit(1);
    }

    match session.complete_login(line.trim()).await {
        Ok(user) => {
            println!();
            println!("[OK] Logged in as {}", user.name());
        }
        Err(e) => {
            eprintln!();
            eprintln!("[ERROR] Login failed: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_logout(session: &Session) {
    match session.logout().await {
        Ok(()) => println!("[OK] Logged out. Stored tokens and profile were removed."),
        Err(e) => {
            eprintln!("[ERROR] Logout failed: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_status(session: &Session) {
    session.initialize().await;
    let state = session.snapshot().await;

    match (state.status, state.user) {
        (AuthStatus::Authenticated, Some(user)) => {
            println!("---------------------------------------------------");
            println!("LOGGED IN");
            println!("---------------------------------------------------");
            println!("User:       {} ({})", user.name(), user.id);
            if let Some(email) = &user.email {
                println!("Email:      {}", email);
            }
            if let Some(country) = &user.country {
                println!("Country:    {}", country);
            }
            if let Some(product) = &user.product {
                println!("Plan:       {}", product);
            }
            if let Some(followers) = &user.followers {
                println!("Followers:  {}", format_number(followers.total));
            }
            println!("---------------------------------------------------");
        }
        _ => {
            println!("Not logged in.");
            if let Some(error) = state.error {
                println!("Last error: {}", error);
            }
            println!("Run 'statify login' to connect your Spotify account.");
        }
    }
}

async fn handle_top_artists(insights: Insights, range: TimeRange, limit: u32, json_path: Option<&str>) {
    println!("Fetching your top artists ({})...", range.label());

    let page = match insights.top_artists(range, limit).await {
        Ok(page) => page,
        Err(e) => fail("Failed to fetch top artists", &e),
    };

    println!();
    println!("{:<4} | {:<30} | {:<30} | {:<9} | {:<4}", "#", "Artist", "Genres", "Followers", "Pop");
    println!("{:-<4}-+-{:-<30}-+-{:-<30}-+-{:-<9}-+-{:-<4}", "", "", "", "", "");
    for (i, artist) in page.items.iter().enumerate() {
        let genres = artist.genres.iter().take(2).cloned().collect::<Vec<_>>().join(", ");
        let followers = artist
            .followers
            .as_ref()
            .map(|f| format_number(f.total))
            .unwrap_or_default();
        println!(
            "{:<4} | {:<30} | {:<30} | {:<9} | {:<4}",
            i + 1,
            truncate(&artist.name, 30),
            truncate(&genres, 30),
            followers,
            artist.popularity.unwrap_or_default()
        );
    }

    if let Some(path) = json_path {
        save_report(path, page.as_ref());
    }
}

async fn handle_top_tracks(insights: Insights, range: TimeRange, limit: u32, json_path: Option<&str>) {
    println!("Fetching your top tracks ({})...", range.label());

    let page = match insights.top_tracks(range, limit).await {
        Ok(page) => page,
        Err(e) => fail("Failed to fetch top tracks", &e),
    };

    println!();
    println!("{:<4} | {:<30} | {:<25} | {:<6} | {:<22}", "#", "Track", "Artists", "Length", "ID");
    println!("{:-<4}-+-{:-<30}-+-{:-<25}-+-{:-<6}-+-{:-<22}", "", "", "", "", "");
    for (i, track) in page.items.iter().enumerate() {
        println!(
            "{:<4} | {:<30} | {:<25} | {:<6} | {:<22}",
            i + 1,
            truncate(&track.name, 30),
            truncate(&track.artist_names(), 25),
            format_duration(track.duration_ms),
            track.id.as_deref().unwrap_or("local")
        );
    }
    println!();
    println!("Tip: Copy an ID and run 'statify features <ID>'");

    if let Some(path) = json_path {
        save_report(path, page.as_ref());
    }
}

async fn handle_recent(insights: Insights, limit: u32, json_path: Option<&str>) {
    println!("Fetching recently played tracks...");

    let recent = match insights.recently_played(limit).await {
        Ok(recent) => recent,
        Err(e) => fail("Failed to fetch recently played tracks", &e),
    };

    if recent.items.is_empty() {
        println!();
        println!("No recently played tracks.");
    }
    println!();
    for play in &recent.items {
        println!(
            "{}  {}",
            play.played_at.format("%Y-%m-%d %H:%M"),
            play.track
        );
    }

    if let Some(path) = json_path {
        save_report(path, recent.as_ref());
    }
}

async fn handle_now_playing(insights: Insights) {
    let playing = match insights.currently_playing().await {
        Ok(playing) => playing,
        Err(e) => fail("Failed to fetch playback state", &e),
    };

    match &*playing {
        Some(current) => match &current.item {
            Some(track) => {
                let state = if current.is_playing { "PLAYING" } else { "PAUSED" };
                println!("[{}] {}", state, track);
                if let Some(progress) = current.progress_ms {
                    println!(
                        "         {} / {}",
                        format_duration(progress),
                        format_duration(track.duration_ms)
                    );
                }
                if let Some(device) = &current.device {
                    println!("         on {} ({})", device.name, device.kind);
                }
            }
            None => println!("Something is playing, but it is not a track."),
        },
        None => println!("Nothing is playing right now."),
    }
}

fn print_feature_bars(features: &[(&'static str, f32)]) {
    for (name, value) in features {
        println!(
            "{:<17} {} {:>3}%  {}",
            feature_label(name),
            bar(*value, 20),
            (value * 100.0).round() as i32,
            feature_description(name)
        );
    }
}

async fn handle_features(insights: Insights, track_id: &str, json_path: Option<&str>) {
    println!("Fetching audio features for {} ...", track_id);

    let features = match insights.track_features(track_id).await {
        Ok(features) => features,
        Err(e) => fail("Failed to fetch audio features", &e),
    };

    println!();
    println!("AUDIO FEATURES");
    println!("---------------------------------------------------");
    print_feature_bars(&features.percentages());
    println!("---------------------------------------------------");
    println!("Tempo:     {:.0} BPM", features.tempo);
    println!("Loudness:  {:.1} dB", features.loudness);
    println!("Key/Mode:  {} / {}", features.key, if features.mode == 1 { "major" } else { "minor" });
    println!("Length:    {}", format_duration(features.duration_ms));

    if let Some(path) = json_path {
        save_report(path, features.as_ref());
    }
}

async fn handle_mood(insights: Insights, range: TimeRange, json_path: Option<&str>) {
    println!("Analyzing your top tracks ({})...", range.label());

    let profile = match insights.feature_profile(range).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            println!();
            println!("No top tracks to analyze yet.");
            return;
        }
        Err(e) => fail("Failed to analyze top tracks", &e),
    };

    println!();
    println!("AVERAGE AUDIO FEATURES ({} tracks)", profile.tracks);
    println!("---------------------------------------------------");
    print_feature_bars(&profile.percentages());
    println!("---------------------------------------------------");
    println!("Average tempo: {:.0} BPM", profile.tempo);

    if let Some(path) = json_path {
        save_report(path, &profile);
    }
}

async fn handle_genres(insights: Insights, range: TimeRange, json_path: Option<&str>) {
    println!("Counting genres across your top artists ({})...", range.label());

    let genres = match insights.genres(range).await {
        Ok(genres) => genres,
        Err(e) => fail("Failed to fetch top artists", &e),
    };

    println!();
    if genres.is_empty() {
        println!("Your top artists have no genre information.");
        return;
    }
    println!("TOP GENRES");
    println!("---------------------------------------------------");
    for share in &genres {
        println!(
            "{:<25} {} {:>3}% ({})",
            truncate(&share.genre, 25),
            bar(share.percent / 100.0, 20),
            share.percent.round() as i32,
            share.count
        );
    }

    if let Some(path) = json_path {
        save_report(path, &genres);
    }
}

async fn handle_overview(insights: Insights, range: TimeRange, json_path: Option<&str>) {
    let overview = match insights.overview(range).await {
        Ok(overview) => overview,
        Err(e) => fail("Failed to build overview", &e),
    };

    println!();
    println!("---------------------------------------------------");
    println!("OVERVIEW ({})", range.label());
    println!("---------------------------------------------------");
    println!("Top Artists:");
    for (i, artist) in overview.top_artists.iter().enumerate() {
        println!("  #{} {}", i + 1, artist);
    }
    println!();
    println!("Top Tracks:");
    for (i, track) in overview.top_tracks.iter().enumerate() {
        println!("  #{} {}", i + 1, track);
    }
    println!();
    println!("Top Genres:");
    for share in &overview.top_genres {
        println!("  {:<25} {:>3}%", truncate(&share.genre, 25), share.percent.round() as i32);
    }
    println!("---------------------------------------------------");
    println!("Recently played: {} tracks", overview.recently_played_count);

    if let Some(path) = json_path {
        save_report(path, &overview);
    }
}

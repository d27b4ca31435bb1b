use std::path::Path;
use std::time::Duration;

use stemset_core::Player;

/// Load each stem named on the command line, play them in unison with a
/// 120 BPM click, and print positions while running.
fn main() -> anyhow::Result<()> {
    env_logger::init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: play_stems <stem.wav> [stem.wav ...]");
    }

    let mut player = Player::new();
    // A CLI run counts as a user gesture; bring the output up immediately
    player.activate()?;

    for path in &paths {
        let audio = stemset_core::decode_file(Path::new(path))?;
        let id = player.load_decoded(audio, path.clone())?;
        println!("loaded track {id}: {path}");
    }

    player.play();
    player.start_metronome(120.0);

    let first = player.tracks()[0].id;
    let duration = player.tracks()[0].audio.duration_secs();

    // Host tick loop at a display-like cadence
    let mut last_printed = -1i64;
    loop {
        player.tick();

        let position = player.position(first)?;
        if position as i64 > last_printed {
            last_printed = position as i64;
            println!("position: {position:.1}s");
        }
        if position >= duration {
            break;
        }
        std::thread::sleep(Duration::from_millis(15));
    }

    player.pause();
    Ok(())
}

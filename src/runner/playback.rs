//! Scripted playback for languages without a live engine.
//!
//! Output is canned per language and never depends on the submitted source.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::RunFault;
use crate::sandbox::{OutputLine, RunRecorder};

const EXIT_OK: &str = "[process] exited with code 0";

pub struct PlaybackEngine {
    min_delay: Duration,
    max_delay: Duration,
}

impl PlaybackEngine {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// No delay between lines.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn supports(language: &str) -> bool {
        script(language).is_some()
    }

    /// Emits the canned output for `language`, one line per delay.
    pub async fn play(&self, language: &str, recorder: &mut RunRecorder) -> Result<(), RunFault> {
        let lines =
            script(language).ok_or_else(|| RunFault::UnsupportedLanguage(language.to_string()))?;
        debug!("Playback: {} lines for {language}", lines.len());
        for line in lines {
            let delay = self.delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            recorder.line(line);
        }
        Ok(())
    }

    fn delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        let ms = rand::thread_rng()
            .gen_range(self.min_delay.as_millis() as u64..=self.max_delay.as_millis() as u64);
        Duration::from_millis(ms)
    }
}

/// Canned output, or `None` when the language has no script.
pub fn script(language: &str) -> Option<Vec<OutputLine>> {
    use OutputLine as L;

    let lines = match language {
        "typescript" => vec![
            L::sys("[tsc] Compiling TypeScript → JavaScript..."),
            L::sys("[tsc] No errors found."),
            L::sys("[node] Running compiled output..."),
            L::out("\"magnitude:\" 5"),
            L::out("\"normalized:\" {\"x\":0.6,\"y\":0.8}"),
        ],
        "rust" => vec![
            L::sys("[rustc] Compiling with optimization level 2..."),
            L::sys("[rustc] Linking... Done (0.8s)"),
            L::sys("[run] ./target/release/main"),
            L::out("Fibonacci: [0, 1, 1, 2, 3, 5, 8, 13, 21, 34]"),
            L::out("hello hello"),
            L::sys(EXIT_OK),
        ],
        "go" => vec![
            L::sys("[go build] compiling..."),
            L::sys("[go run] ./main.go"),
            L::out("Primes under 50:"),
            L::out("2 3 5 7 11 13 17 19 23 29 31 37 41 43 47 "),
            L::sys(EXIT_OK),
        ],
        "ruby" => vec![
            L::sys("[ruby] 3.2.0"),
            L::out("Unsorted: [3, 6, 8, 10, 1, 2, 1]"),
            L::out("Sorted:   [1, 1, 2, 3, 6, 8, 10]"),
            L::sys(EXIT_OK),
        ],
        "java" => vec![
            L::sys("[javac] Compiling Main.java..."),
            L::sys("[java] Running Main..."),
            L::out("Hello from Java!"),
            L::sys(EXIT_OK),
        ],
        "cpp" | "c" => vec![
            L::sys(format!(
                "[g++] Compiling {} code...",
                if language == "cpp" { "C++" } else { "C" }
            )),
            L::sys("[ld] Linking... Done (0.3s)"),
            L::sys("[run] ./a.out"),
            L::out("Sorted: 11 12 22 25 34 64 90 "),
            L::sys(EXIT_OK),
        ],
        "bash" => {
            let mut lines = vec![
                L::sys("[bash] executing script..."),
                L::out("System Info:"),
                L::out("  OS: Linux (capshield sandbox)"),
                L::out("  Shell: bash 5.2"),
                L::out(""),
            ];
            lines.extend((1..=5).map(|i| L::out(format!("Loop iteration: {i}"))));
            lines.extend([
                L::out(""),
                L::out("Files in workspace:"),
                L::out("  main.py  index.js  README.md  styles.css"),
                L::sys(EXIT_OK),
            ]);
            lines
        }
        "swift" => vec![
            L::sys("[swift] Compiling..."),
            L::out("Hello from Swift!"),
            L::sys(EXIT_OK),
        ],
        "kotlin" => vec![
            L::sys("[kotlinc] Compiling Kotlin..."),
            L::out("Hello from Kotlin!"),
            L::sys(EXIT_OK),
        ],
        "r" => vec![
            L::sys("[R] 4.3.0"),
            L::out("[1]  1  1  2  3  5  8 13 21 34 55"),
            L::sys(EXIT_OK),
        ],
        "lua" => vec![
            L::sys("[lua] 5.4"),
            L::out("Hello from Lua!"),
            L::sys(EXIT_OK),
        ],
        "php" => vec![
            L::sys("[php] 8.2"),
            L::out("Hello from PHP!"),
            L::sys(EXIT_OK),
        ],
        _ => return None,
    };
    Some(lines)
}

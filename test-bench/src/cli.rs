//! Command line helpers shared by the bench binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

/// Parse duration string with units (e.g., "1.5s", "500ms", "2m"); bare
/// numbers are seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = s.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = s.strip_suffix('m') {
        (num, "m")
    } else {
        (s, "s")
    };

    let value: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid numeric value: {}", num_str))?;

    if !value.is_finite() || value <= 0.0 {
        return Err("Duration must be positive".to_string());
    }

    let seconds = match unit {
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        _ => value,
    };
    Ok(Duration::from_secs_f64(seconds))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationArg(pub Duration);

impl std::str::FromStr for DurationArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(DurationArg)
    }
}

impl std::fmt::Display for DurationArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total_ms = self.0.as_millis();

        if total_ms >= 1000 && total_ms % 1000 == 0 {
            write!(f, "{}s", total_ms / 1000)
        } else if total_ms >= 1000 {
            write!(f, "{:.3}s", self.0.as_secs_f64())
        } else {
            write!(f, "{}ms", total_ms)
        }
    }
}

/// Options every bench service takes.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    #[arg(
        long,
        help = "Configuration directory (defaults to ~/.htb_config)"
    )]
    pub config_dir: Option<PathBuf>,

    #[arg(
        long,
        help = "Tick period overriding the stored configuration (e.g. 3s, 500ms)"
    )]
    pub interval: Option<DurationArg>,

    #[arg(long, help = "Stop after this many ticks")]
    pub ticks: Option<u64>,
}

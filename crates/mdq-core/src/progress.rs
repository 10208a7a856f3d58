//! Progress extraction from downloader output lines.
//!
//! The downloader is invoked with a fixed machine-oriented progress template
//! (see [`progress_template_args`]) so each update arrives as one line shaped
//! `<tag>:<percent>|<rate>|<eta>`. Parsing is pure and stateless: a line is
//! either a sample or nothing. Malformed fields degrade to "unknown" instead
//! of discarding the whole line.

use serde::Serialize;
use std::path::PathBuf;

/// Record tag for transfer progress.
pub const DOWNLOAD_TAG: &str = "download";
/// Record tag for post-processing (merge, audio extraction, ...).
pub const POSTPROCESS_TAG: &str = "postprocess";

/// Which stage the downloader reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Downloading,
    Postprocessing,
}

/// One parsed progress update. `None` fields are unknown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    pub percent: Option<f64>,
    pub rate: Option<String>,
    pub eta: Option<String>,
    pub phase: Phase,
}

impl ProgressSample {
    fn postprocessing() -> Self {
        Self {
            percent: None,
            rate: None,
            eta: None,
            phase: Phase::Postprocessing,
        }
    }
}

/// `--progress-template` arguments matching [`parse_progress_line`].
///
/// The leading `download:` / `postprocess:` selects the template type for the
/// downloader; the second copy is literal text, so emitted lines keep their tag.
pub fn progress_template_args() -> Vec<String> {
    vec![
        "--progress-template".to_string(),
        format!(
            "download:{DOWNLOAD_TAG}:%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s"
        ),
        "--progress-template".to_string(),
        format!("postprocess:{POSTPROCESS_TAG}:%(progress.status)s|%(progress.postprocessor)s|"),
    ]
}

/// Parse one output line into a progress sample.
///
/// Returns `None` for anything that is not a tagged progress record.
pub fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    let line = line.trim();
    let (tag, body) = line.split_once(':')?;
    match tag.trim() {
        DOWNLOAD_TAG => {
            let mut fields = body.splitn(3, '|');
            let percent = fields.next()?;
            // A download record always carries all three fields.
            let rate = fields.next()?;
            let eta = fields.next()?;
            Some(ProgressSample {
                percent: parse_percent(percent),
                rate: text_field(rate),
                eta: text_field(eta),
                phase: Phase::Downloading,
            })
        }
        POSTPROCESS_TAG => Some(ProgressSample::postprocessing()),
        _ => None,
    }
}

fn parse_percent(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let raw = raw.strip_suffix('%').unwrap_or(raw).trim();
    let value = raw.parse::<f64>().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0))
}

fn text_field(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("N/A") || raw.eq_ignore_ascii_case("Unknown") {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Parse a line announcing where the downloader writes (or has written) its file.
///
/// Recognized forms:
/// - `[download] Destination: <path>`
/// - `[ExtractAudio] Destination: <path>`
/// - `[Merger] Merging formats into "<path>"`
/// - `[download] <path> has already been downloaded`
pub fn parse_destination_line(line: &str) -> Option<PathBuf> {
    let line = line.trim_end();
    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into \"") {
        return rest.strip_suffix('"').filter(|p| !p.is_empty()).map(PathBuf::from);
    }
    if let Some(rest) = line
        .strip_prefix("[download] Destination: ")
        .or_else(|| line.strip_prefix("[ExtractAudio] Destination: "))
    {
        let rest = rest.trim();
        return (!rest.is_empty()).then(|| PathBuf::from(rest));
    }
    if let Some(rest) = line.strip_prefix("[download] ") {
        if let Some(path) = rest.strip_suffix(" has already been downloaded") {
            return (!path.is_empty()).then(|| PathBuf::from(path));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_download_record() {
        let s = parse_progress_line("download:45.2%|1.3MiB/s|00:32").unwrap();
        assert_eq!(
            s,
            ProgressSample {
                percent: Some(45.2),
                rate: Some("1.3MiB/s".to_string()),
                eta: Some("00:32".to_string()),
                phase: Phase::Downloading,
            }
        );
    }

    #[test]
    fn unknown_fields_do_not_drop_the_line() {
        let s = parse_progress_line("download:N/A|N/A|N/A").unwrap();
        assert_eq!(s.percent, None);
        assert_eq!(s.rate, None);
        assert_eq!(s.eta, None);
        assert_eq!(s.phase, Phase::Downloading);
    }

    #[test]
    fn padded_percent_and_unknown_rate() {
        // The downloader right-aligns `_percent_str`.
        let s = parse_progress_line("download:  0.0%|Unknown|00:05:00").unwrap();
        assert_eq!(s.percent, Some(0.0));
        assert_eq!(s.rate, None);
        assert_eq!(s.eta.as_deref(), Some("00:05:00"));
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(
            parse_progress_line("download:130%|1KiB/s|00:00").unwrap().percent,
            Some(100.0)
        );
        assert_eq!(
            parse_progress_line("download:-3%|1KiB/s|00:00").unwrap().percent,
            Some(0.0)
        );
    }

    #[test]
    fn garbage_percent_is_unknown() {
        let s = parse_progress_line("download:abc%|2.0MiB/s|00:10").unwrap();
        assert_eq!(s.percent, None);
        assert_eq!(s.rate.as_deref(), Some("2.0MiB/s"));
        assert!(parse_progress_line("download:NaN|x|y").unwrap().percent.is_none());
    }

    #[test]
    fn postprocess_record_is_phase_only() {
        let s = parse_progress_line("postprocess:started|Merger|").unwrap();
        assert_eq!(s.phase, Phase::Postprocessing);
        assert_eq!(s.percent, None);
        assert_eq!(s.rate, None);
    }

    #[test]
    fn other_lines_are_ignored() {
        assert!(parse_progress_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_progress_line("").is_none());
        assert!(parse_progress_line("download:12.5%").is_none());
        assert!(parse_progress_line("45.2%|1.3MiB/s|00:32").is_none());
    }

    #[test]
    fn template_args_carry_both_tags() {
        let args = progress_template_args();
        assert_eq!(args.len(), 4);
        assert!(args[1].starts_with("download:download:"));
        assert!(args[1].contains("progress._percent_str"));
        assert!(args[3].starts_with("postprocess:postprocess:"));
    }

    #[test]
    fn destination_lines() {
        assert_eq!(
            parse_destination_line("[download] Destination: /tmp/a b.webm"),
            Some(PathBuf::from("/tmp/a b.webm"))
        );
        assert_eq!(
            parse_destination_line("[Merger] Merging formats into \"/tmp/out.mkv\""),
            Some(PathBuf::from("/tmp/out.mkv"))
        );
        assert_eq!(
            parse_destination_line("[ExtractAudio] Destination: /tmp/song.mp3"),
            Some(PathBuf::from("/tmp/song.mp3"))
        );
        assert_eq!(
            parse_destination_line("[download] /tmp/x.mp4 has already been downloaded"),
            Some(PathBuf::from("/tmp/x.mp4"))
        );
        assert!(parse_destination_line("[download]  12.0% of 3.00MiB").is_none());
    }
}

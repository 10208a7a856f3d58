//! A POSIX shell script standing in for yt-dlp.
//!
//! The locator picks the behavior: `https://fake.test/<mode>/<name>`.
//! - `ok`: announces `<dir>/<name>.mp4`, prints progress, writes the file, exits 0.
//! - `fail`: prints a warning and an `ERROR:` line on stderr, exits 1.
//! - `nofile`: announces a destination but never writes it, exits 0.
//! - `regress`: reports 60% then 20% (a restarted fragment), then finishes like `ok`.
//! - `hold`: writes `<name>.mp4.part`, prints 5% and waits until
//!   `<dir>/release-<name>` exists, then finishes like `ok`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const SCRIPT: &str = r#"#!/bin/sh
out=""
loc=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --) loc="$2"; shift 2 ;;
    *) shift ;;
  esac
done
dir="${out%/*}"
rest="${loc#*://*/}"
mode="${rest%%/*}"
name="${rest#*/}"
dest="$dir/$name.mp4"
echo "[fake] $name: Downloading webpage"
case "$mode" in
  ok)
    echo "[download] Destination: $dest"
    echo "download:  10.0%|1.00MiB/s|00:09"
    echo "download:  60.0%|1.00MiB/s|00:04"
    echo "download: 100.0%|1.00MiB/s|00:00"
    printf 'media' > "$dest"
    echo "postprocess:started|FixupM3u8|"
    exit 0 ;;
  fail)
    echo "WARNING: [fake] falling back to generic extractor" >&2
    echo "ERROR: [generic] Unsupported URL: $loc" >&2
    exit 1 ;;
  regress)
    echo "[download] Destination: $dest"
    echo "download:  60.0%|1.00MiB/s|00:04"
    sleep 0.1
    echo "download:  20.0%|1.00MiB/s|00:08"
    sleep 0.1
    printf 'media' > "$dest"
    exit 0 ;;
  nofile)
    echo "[download] Destination: $dest"
    echo "download: 100.0%|1.00MiB/s|00:00"
    exit 0 ;;
  hold)
    echo "[download] Destination: $dest"
    printf 'partial' >> "$dest.part"
    echo "download:   5.0%|1.00MiB/s|01:00"
    while [ ! -f "$dir/release-$name" ]; do sleep 0.05; done
    mv "$dest.part" "$dest"
    echo "download: 100.0%|1.00MiB/s|00:00"
    exit 0 ;;
esac
echo "ERROR: unknown fake mode $mode" >&2
exit 2
"#;

/// Write the script into `dir` and return its path.
pub fn install(dir: &Path) -> PathBuf {
    let path = dir.join("fake-yt-dlp");
    std::fs::write(&path, SCRIPT).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Locator understood by the script.
pub fn locator(mode: &str, name: &str) -> String {
    format!("https://fake.test/{mode}/{name}")
}

use crate::error::PlaylistError;
use std::{
    collections::{HashMap, HashSet},
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::{debug, info, warn};

/// Decides whether a position of an input source has to be read on this run.
pub trait Playlist: Send + Sync {
    fn is_processing_needed(
        &self,
        source: &str,
        part: Option<&str>,
        line: u64,
    ) -> Result<bool, PlaylistError>;
}

/// First runs: every line is processed.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlayAll;

impl Playlist for PlayAll {
    fn is_processing_needed(
        &self,
        _source: &str,
        _part: Option<&str>,
        _line: u64,
    ) -> Result<bool, PlaylistError> {
        Ok(true)
    }
}

/// Line sets recovered from a prior run's side files for one source part.
#[derive(Debug, Default)]
pub struct LineLog {
    /// `None` when no success log exists for the source.
    succeeded: Option<HashSet<u64>>,
    errored: HashSet<u64>,
}

impl LineLog {
    pub fn new(succeeded: Option<HashSet<u64>>, errored: HashSet<u64>) -> Self {
        Self { succeeded, errored }
    }

    /// Process everything without a success log; otherwise process lines
    /// that errored or never succeeded.
    pub fn needs(&self, line: u64) -> bool {
        match &self.succeeded {
            None => true,
            Some(done) => self.errored.contains(&line) || !done.contains(&line),
        }
    }
}

/// Replays a failed run from line-number side files in `dir`.
///
/// For a source `s` and optional part `p` the files are
/// `<key>.<success_ext>` and `<key>.<error_ext>`, where `<key>` is `s`, plus
/// `@p` when a part is given. Inside `s` and `p`, characters outside
/// `[A-Za-z0-9.-]` are written as `_xx` per UTF-8 byte, so `in/a_b` becomes
/// `in_2fa_5fb`. Each non-blank line holds one line number; `#` starts a
/// comment.
pub struct ReplayPlaylist {
    dir: PathBuf,
    success_ext: String,
    error_ext: String,
    cache: Mutex<HashMap<String, Arc<LineLog>>>,
}

impl ReplayPlaylist {
    pub const DEFAULT_SUCCESS_EXT: &'static str = "line";
    pub const DEFAULT_ERROR_EXT: &'static str = "error";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_extensions(dir, Self::DEFAULT_SUCCESS_EXT, Self::DEFAULT_ERROR_EXT)
    }

    pub fn with_extensions(
        dir: impl Into<PathBuf>,
        success_ext: impl Into<String>,
        error_ext: impl Into<String>,
    ) -> Self {
        let dir = dir.into();
        info!(dir = %dir.display(), "Replay playlist enabled");
        Self {
            dir,
            success_ext: success_ext.into(),
            error_ext: error_ext.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Distinct `(source, part)` pairs always map to distinct keys.
    pub fn file_key(source: &str, part: Option<&str>) -> String {
        let mut key = escape(source);
        if let Some(p) = part {
            key.push('@');
            key.push_str(&escape(p));
        }
        key
    }

    pub fn success_file(&self, source: &str, part: Option<&str>) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            Self::file_key(source, part),
            self.success_ext
        ))
    }

    pub fn error_file(&self, source: &str, part: Option<&str>) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Self::file_key(source, part), self.error_ext))
    }

    fn log_for(&self, source: &str, part: Option<&str>) -> Result<Arc<LineLog>, PlaylistError> {
        let key = Self::file_key(source, part);
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(log) = cache.get(&key) {
            return Ok(log.clone());
        }

        let succeeded = read_line_numbers(&self.success_file(source, part))?;
        let errored = read_line_numbers(&self.error_file(source, part))?.unwrap_or_default();
        debug!(
            source,
            part,
            succeeded = succeeded.as_ref().map(HashSet::len),
            errored = errored.len(),
            "Loaded replay line logs"
        );
        let log = Arc::new(LineLog::new(succeeded, errored));
        cache.insert(key, log.clone());
        Ok(log)
    }
}

impl Playlist for ReplayPlaylist {
    fn is_processing_needed(
        &self,
        source: &str,
        part: Option<&str>,
        line: u64,
    ) -> Result<bool, PlaylistError> {
        Ok(self.log_for(source, part)?.needs(line))
    }
}

/// `Ok(None)` when the file does not exist.
fn read_line_numbers(path: &Path) -> Result<Option<HashSet<u64>>, PlaylistError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PlaylistError::Io {
                path: path.display().to_string(),
                source: e,
            });
        }
    };

    let mut lines = HashSet::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PlaylistError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match trimmed.parse::<u64>() {
            Ok(n) => {
                lines.insert(n);
            }
            Err(_) => warn!(
                file = %path.display(),
                line = idx + 1,
                content = trimmed,
                "Ignoring malformed line number"
            ),
        }
    }
    Ok(Some(lines))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("_{byte:02x}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write(path: &Path, body: &str) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn reprocesses_errored_and_unrecorded_lines() {
        let log = LineLog::new(Some([1, 2, 3].into()), [2].into());
        let needed: Vec<u64> = (1..=6).filter(|n| log.needs(*n)).collect();
        assert_eq!(needed, vec![2, 4, 5, 6]);
        assert!(!log.needs(1));
        assert!(!log.needs(3));
    }

    #[test]
    fn without_success_log_everything_is_processed() {
        let log = LineLog::new(None, [9].into());
        assert!((1..100).all(|n| log.needs(n)));
    }

    #[test]
    fn reads_side_files_per_source_and_part() {
        let dir = tempdir().unwrap();
        let playlist = ReplayPlaylist::new(dir.path());

        write(
            &playlist.success_file("/data/in.csv", None),
            "# completed\n1\n2\n3\n",
        );
        write(&playlist.error_file("/data/in.csv", None), "2\n");

        let needed: Vec<u64> = (1..=5)
            .filter(|n| {
                playlist
                    .is_processing_needed("/data/in.csv", None, *n)
                    .unwrap()
            })
            .collect();
        assert_eq!(needed, vec![2, 4, 5]);

        // Another part of the same source has no logs.
        assert!(
            playlist
                .is_processing_needed("/data/in.csv", Some("p1"), 1)
                .unwrap()
        );
        assert_eq!(ReplayPlaylist::file_key("/data/in.csv", Some("p1")), "_2fdata_2fin.csv@p1");
    }

    #[test]
    fn side_file_keys_never_collide() {
        let key = ReplayPlaylist::file_key;
        assert_ne!(key("a/b", None), key("a_b", None));
        assert_ne!(key("a.b", None), key("a", Some("b")));
        assert_ne!(key("a@b", None), key("a", Some("b")));
        assert_eq!(key("orders", None), "orders");

        let dir = tempdir().unwrap();
        let playlist = ReplayPlaylist::new(dir.path());
        write(&playlist.success_file("a_b", None), "1\n");
        assert!(!playlist.is_processing_needed("a_b", None, 1).unwrap());
        assert!(playlist.is_processing_needed("a/b", None, 1).unwrap());
    }

    #[test]
    fn ignores_malformed_entries() {
        let dir = tempdir().unwrap();
        let playlist = ReplayPlaylist::new(dir.path());
        write(&playlist.success_file("src", None), "1\nnot-a-number\n3\n");
        assert!(!playlist.is_processing_needed("src", None, 1).unwrap());
        assert!(playlist.is_processing_needed("src", None, 2).unwrap());
    }

    #[test]
    fn play_all_processes_everything() {
        assert!(PlayAll.is_processing_needed("x", Some("0"), 42).unwrap());
    }
}

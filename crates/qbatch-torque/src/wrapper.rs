//! Wrapper script generation.
//!
//! The scheduler runs a small generated shell script rather than the
//! caller's command directly. The script moves into `$PBS_O_WORKDIR` (the
//! directory `qsub` was invoked from) and runs the command verbatim.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::Write;
use thiserror::Error;

const WRAPPER_PREFIX: &str = "torque_wrapper";
const WRAPPER_SUFFIX: &str = ".sh";

#[derive(Error, Debug)]
pub enum WrapperError {
    #[error("Failed to create wrapper script: {0}")]
    Io(#[from] std::io::Error),
    #[error("Wrapper script path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

/// `#PBS` directives written at the top of the wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrapperDirectives {
    pub queue: Option<String>,
    pub stdout_log: String,
    pub stderr_log: String,
}

/// Render the wrapper script text for a command.
pub fn render_wrapper(command: &str, directives: &WrapperDirectives) -> String {
    let mut script = String::from("#!/bin/sh\n");
    if let Some(queue) = &directives.queue {
        script.push_str(&format!("#PBS -q {}\n", queue));
    }
    script.push_str(&format!("#PBS -e {}\n", directives.stderr_log));
    script.push_str(&format!("#PBS -o {}\n\n", directives.stdout_log));
    script.push_str("cd $PBS_O_WORKDIR\n\n");
    script.push_str(command);
    script.push('\n');
    script
}

/// Write a uniquely named, executable wrapper script and return its path.
///
/// The file is only kept once it has been fully written and made
/// executable; on any error the temporary file is removed.
pub fn write_wrapper(
    dir: Option<&Utf8Path>,
    command: &str,
    directives: &WrapperDirectives,
) -> Result<Utf8PathBuf, WrapperError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(WRAPPER_PREFIX).suffix(WRAPPER_SUFFIX);
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    let path = Utf8Path::from_path(file.path())
        .map(Utf8Path::to_path_buf)
        .ok_or_else(|| WrapperError::NonUtf8Path(file.path().display().to_string()))?;

    file.write_all(render_wrapper(command, directives).as_bytes())?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(0o750))?;
    }

    file.keep().map_err(|e| WrapperError::Io(e.error))?;
    tracing::debug!(path = %path, "wrote wrapper script");

    Ok(path)
}

/// Delete a wrapper script. A script that is already gone is not an error.
pub fn remove_wrapper(path: &Utf8Path) -> Result<(), WrapperError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn directives() -> WrapperDirectives {
        WrapperDirectives {
            queue: None,
            stdout_log: "job.out.log".to_string(),
            stderr_log: "job.err.log".to_string(),
        }
    }

    #[test]
    fn test_render_wrapper() {
        let script = render_wrapper("echo hello && sleep 1", &directives());
        assert_eq!(
            script,
            "#!/bin/sh\n#PBS -e job.err.log\n#PBS -o job.out.log\n\ncd $PBS_O_WORKDIR\n\necho hello && sleep 1\n"
        );
    }

    #[test]
    fn test_render_wrapper_with_queue() {
        let mut d = directives();
        d.queue = Some("normalsp".to_string());
        let script = render_wrapper("true", &d);
        assert!(script.starts_with("#!/bin/sh\n#PBS -q normalsp\n#PBS -e"));
        assert!(script.ends_with("\ntrue\n"));
    }

    #[test]
    fn test_write_wrapper() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();

        let path = write_wrapper(Some(dir), "echo 'quoted $VAR'", &directives()).unwrap();
        assert!(path.starts_with(dir));
        let name = path.file_name().unwrap();
        assert!(name.starts_with("torque_wrapper"));
        assert!(name.ends_with(".sh"));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("echo 'quoted $VAR'\n"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_ne!(mode & 0o100, 0, "owner execute bit missing");
        }
    }

    #[test]
    fn test_write_wrapper_unique_names() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        let a = write_wrapper(Some(dir), "true", &directives()).unwrap();
        let b = write_wrapper(Some(dir), "true", &directives()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_write_wrapper_missing_dir() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap().join("does-not-exist");
        let result = write_wrapper(Some(&dir), "true", &directives());
        assert!(matches!(result, Err(WrapperError::Io(_))));
    }

    #[test]
    fn test_remove_wrapper() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        let path = write_wrapper(Some(dir), "true", &directives()).unwrap();

        remove_wrapper(&path).unwrap();
        assert!(!path.exists());
        // Second removal is a no-op.
        remove_wrapper(&path).unwrap();
    }
}

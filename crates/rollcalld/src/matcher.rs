//! External face matcher.
//!
//! The embedding model runs outside the daemon. For every tick the frame is
//! written to a temporary PNG and the configured program is invoked as
//!
//! ```text
//! <program> [args...] <frame.png> <reference_db>
//! ```
//!
//! It must print a JSON array of `{"identity": ..., "distance": ...}` objects
//! to stdout, where `identity` is an enrolled label or the path of the
//! reference image that matched. Order is not significant. A run that
//! outlives the configured timeout is killed and counts as a failed call.

use rollcall_core::{FaceMatcher, MatchCandidate, MatcherError, ReferenceIndex};
use rollcall_hw::Frame;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Longest stderr excerpt carried in an invocation error.
const STDERR_EXCERPT: usize = 512;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Deserialize)]
struct RawCandidate {
    identity: String,
    distance: f32,
}

pub struct CommandMatcher {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

struct Finished {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl CommandMatcher {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, MatcherError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| MatcherError::Invocation("empty matcher command".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    /// Run the program to completion or until the timeout, whichever is first.
    fn run(&self, image: &Path, reference_db: &Path) -> Result<Finished, MatcherError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .arg(reference_db)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MatcherError::Invocation(format!("{}: {e}", self.program)))?;

        // Drained on their own threads so a chatty child never blocks on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(
                        program = %self.program,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "matcher timed out; killed"
                    );
                    return Err(MatcherError::Invocation(format!(
                        "{} timed out after {} ms",
                        self.program,
                        self.timeout.as_millis()
                    )));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(MatcherError::Invocation(format!("{}: {e}", self.program)));
                }
            }
        };

        Ok(Finished {
            status,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl FaceMatcher<Frame> for CommandMatcher {
    fn find(
        &mut self,
        frame: &Frame,
        reference: &ReferenceIndex,
    ) -> Result<Vec<MatchCandidate>, MatcherError> {
        let image = write_frame(frame)?;

        let output = self.run(image.path(), reference.root())?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let excerpt: String = stderr.chars().take(STDERR_EXCERPT).collect();
            return Err(MatcherError::Invocation(format!(
                "{} exited with {}: {excerpt}",
                self.program, output.status
            )));
        }

        let candidates = parse_candidates(&output.stdout, reference)?;
        tracing::trace!(
            sequence = frame.sequence,
            candidates = candidates.len(),
            "matcher returned"
        );
        Ok(candidates)
    }
}

/// Parse matcher stdout and resolve each reported identity through the index.
pub fn parse_candidates(
    stdout: &[u8],
    reference: &ReferenceIndex,
) -> Result<Vec<MatchCandidate>, MatcherError> {
    let raw: Vec<RawCandidate> =
        serde_json::from_slice(stdout).map_err(|e| MatcherError::Malformed(e.to_string()))?;

    raw.into_iter()
        .map(|c| -> Result<MatchCandidate, MatcherError> {
            let identity = reference
                .resolve(&c.identity)
                .ok_or(MatcherError::UnknownIdentity(c.identity))?;
            Ok(MatchCandidate::new(identity, c.distance))
        })
        .collect()
}

fn write_frame(frame: &Frame) -> Result<NamedTempFile, MatcherError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected || expected == 0 {
        return Err(MatcherError::Invocation(format!(
            "frame buffer holds {} bytes, {}x{} RGB needs {expected}",
            frame.data.len(),
            frame.width,
            frame.height
        )));
    }

    let file = tempfile::Builder::new()
        .prefix("rollcall-frame-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| MatcherError::Invocation(format!("temporary frame file: {e}")))?;

    image::save_buffer_with_format(
        file.path(),
        &frame.data,
        frame.width,
        frame.height,
        image::ColorType::Rgb8,
        image::ImageFormat::Png,
    )
    .map_err(|e| MatcherError::Invocation(format!("encoding frame: {e}")))?;

    Ok(file)
}

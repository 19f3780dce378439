//! The command registry.

use std::{
    collections::HashMap,
    fmt,
    fs,
    io::ErrorKind,
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::{Duration, Instant},
};

use async_channel::{Receiver, Sender};
use async_process::{Child, Command};
use executor_core::{Executor, Task};
use futures_lite::{AsyncRead, AsyncReadExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use windtools_core::Error;
use windtools_sandbox::RootRegistry;

use crate::{
    CommandRequest, CommandStatus,
    record::{CommandRecord, Utf8Carry},
    window::{CommandSnapshot, Priority, window},
};

/// Interval between status checks while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

type SharedRecord = Arc<Mutex<CommandRecord>>;

fn lock(record: &SharedRecord) -> MutexGuard<'_, CommandRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Records {
    by_id: HashMap<String, SharedRecord>,
    order: Vec<String>,
}

/// One line of [`CommandRegistry::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSummary {
    /// Command identifier.
    pub command_id: String,
    /// Program and arguments.
    pub command_line: String,
    /// Lifecycle status.
    pub status: CommandStatus,
    /// Directory the command runs in.
    pub working_dir: PathBuf,
    /// Seconds since start (or registration, while pending).
    pub runtime_seconds: f64,
}

/// Output of one pipe, in arrival order.
#[derive(Debug)]
enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Tracks external commands from registration to exit.
///
/// Cloning is cheap and every clone sees the same commands. Processes run on background tasks
/// spawned through `E`, so no call blocks on a running command except [`wait`](Self::wait),
/// which is bounded by its timeout. Records stay queryable after the process exits for as
/// long as the registry lives.
pub struct CommandRegistry<E> {
    roots: RootRegistry,
    records: Arc<RwLock<Records>>,
    executor: E,
}

impl<E: Clone> Clone for CommandRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            roots: self.roots.clone(),
            records: self.records.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<E> fmt::Debug for CommandRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.read().order.len();
        f.debug_struct("CommandRegistry")
            .field("roots", &self.roots)
            .field("commands", &count)
            .finish_non_exhaustive()
    }
}

impl<E> CommandRegistry<E> {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Records> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Records> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, id: &str) -> Result<SharedRecord, Error> {
        self.read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("Command {id} not found")))
    }

    /// The roots working directories are checked against.
    #[must_use]
    pub const fn roots(&self) -> &RootRegistry {
        &self.roots
    }

    fn resolve_working_dir(&self, raw: Option<&str>) -> Result<PathBuf, Error> {
        let path = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => self.roots.validate(raw)?,
            _ => {
                let working_dir = self.roots.require_working_dir()?;
                self.roots.validate(&working_dir.to_string_lossy())?
            }
        };
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => Ok(path),
            Ok(_) => Err(Error::invalid(format!(
                "Working directory is not a directory: {}",
                path.display()
            ))),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(Error::not_found(format!(
                "Working directory does not exist: {}",
                path.display()
            ))),
            Err(error) => Err(error.into()),
        }
    }

    /// Registers a command in `pending_approval` and returns its identifier.
    ///
    /// Nothing is spawned yet. The working directory must pass the confinement gate and be
    /// an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty command, or the gate's refusal for the
    /// working directory.
    pub fn register(&self, request: CommandRequest) -> Result<String, Error> {
        if request.command.trim().is_empty() {
            return Err(Error::invalid("command must not be empty"));
        }
        let working_dir = self.resolve_working_dir(request.working_dir.as_deref())?;

        let id = uuid::Uuid::new_v4().to_string();
        debug!(
            command_id = %id,
            command = %request.command_line(),
            working_dir = %working_dir.display(),
            "registered command"
        );
        let record = CommandRecord::new(id.clone(), request, working_dir);

        let mut records = self.write();
        records
            .by_id
            .insert(id.clone(), Arc::new(Mutex::new(record)));
        records.order.push(id.clone());
        Ok(id)
    }

    /// Current status of a command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identifier.
    pub fn current_status(&self, id: &str) -> Result<CommandStatus, Error> {
        Ok(lock(&self.record(id)?).status)
    }

    /// Returns a windowed snapshot of a command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identifier.
    pub fn status(
        &self,
        id: &str,
        priority: Priority,
        char_budget: usize,
    ) -> Result<CommandSnapshot, Error> {
        let record = self.record(id)?;
        let record = lock(&record);
        let full = record.output();
        let output = window(&full, priority, char_budget);
        Ok(CommandSnapshot {
            command_id: record.id.clone(),
            status: record.status,
            truncated: output.len() < full.len(),
            output: output.to_string(),
            runtime_seconds: record.runtime_seconds(),
            exit_code: record.exit_code,
            error: record.error.clone(),
        })
    }

    /// Lists every command in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<CommandSummary> {
        let records = self.read();
        records
            .order
            .iter()
            .filter_map(|id| records.by_id.get(id))
            .map(|record| {
                let record = lock(record);
                CommandSummary {
                    command_id: record.id.clone(),
                    command_line: record.request.command_line(),
                    status: record.status,
                    working_dir: record.working_dir.clone(),
                    runtime_seconds: record.runtime_seconds(),
                }
            })
            .collect()
    }

    /// Waits until the command reaches a terminal status or `timeout` elapses.
    ///
    /// A command still pending approval is returned as is, since nothing would change
    /// while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identifier.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<CommandStatus, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.current_status(id)?;
            let now = Instant::now();
            if status != CommandStatus::Running || now >= deadline {
                return Ok(status);
            }
            async_io::Timer::after(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

impl<E: Executor + Clone + Send + Sync + 'static> CommandRegistry<E> {
    /// Creates an empty registry that checks working directories against `roots` and runs
    /// processes on `executor`.
    pub fn new(roots: RootRegistry, executor: E) -> Self {
        Self {
            roots,
            records: Arc::default(),
            executor,
        }
    }

    /// Starts a pending command.
    ///
    /// The working directory is validated again against the current roots. If the process
    /// cannot be spawned the command becomes `failed` with the error recorded; otherwise it is
    /// `running` and its output accumulates in the background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identifier and [`Error::InvalidArgument`]
    /// if the command is no longer pending.
    pub fn start(&self, id: &str) -> Result<CommandStatus, Error> {
        let shared = self.record(id)?;
        let (request, working_dir) = {
            let mut record = lock(&shared);
            if record.status != CommandStatus::PendingApproval || record.approved {
                return Err(Error::invalid(format!(
                    "Command {id} is {}; only pending_approval commands can be started",
                    record.status
                )));
            }
            record.approved = true;
            (record.request.clone(), record.working_dir.clone())
        };

        if let Err(error) = self.resolve_working_dir(Some(&working_dir.to_string_lossy())) {
            warn!(command_id = %id, error = %error, "working directory no longer allowed");
            lock(&shared).fail(&error);
            return Ok(CommandStatus::Failed);
        }

        let spawned = Command::new(&request.command)
            .args(&request.args)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                let error = Error::Spawn {
                    command: request.command.clone(),
                    source,
                };
                warn!(command_id = %id, error = %error, "command failed to spawn");
                lock(&shared).fail(&error);
                return Ok(CommandStatus::Failed);
            }
        };

        lock(&shared).mark_running();
        info!(command_id = %id, command = %request.command_line(), "command started");

        let (tx, rx) = async_channel::unbounded();
        if let Some(stdout) = child.stdout.take() {
            self.executor
                .spawn(pump(stdout, tx.clone(), OutputChunk::Stdout))
                .detach();
        }
        if let Some(stderr) = child.stderr.take() {
            self.executor
                .spawn(pump(stderr, tx.clone(), OutputChunk::Stderr))
                .detach();
        }
        drop(tx);
        self.executor.spawn(supervise(child, rx, shared)).detach();

        Ok(CommandStatus::Running)
    }
}

/// Forwards one pipe into the chunk channel until it closes.
async fn pump<R>(mut reader: R, tx: Sender<OutputChunk>, wrap: fn(Vec<u8>) -> OutputChunk)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0_u8; 8192];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(count) => {
                if tx.send(wrap(buffer[..count].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                warn!(error = %error, "output reader failed");
                break;
            }
        }
    }
}

/// Appends output as it arrives, then records the exit status.
///
/// The status is only awaited after both pipes close, so all output is in the record before
/// it turns terminal. The child handle is dropped at that transition.
async fn supervise(mut child: Child, rx: Receiver<OutputChunk>, record: SharedRecord) {
    let mut stdout = Utf8Carry::default();
    let mut stderr = Utf8Carry::default();

    while let Ok(chunk) = rx.recv().await {
        let (text, from_stderr) = match chunk {
            OutputChunk::Stdout(bytes) => (stdout.push(&bytes), false),
            OutputChunk::Stderr(bytes) => (stderr.push(&bytes), true),
        };
        lock(&record).append(text, from_stderr);
    }
    {
        let mut record = lock(&record);
        record.append(stdout.finish(), false);
        record.append(stderr.finish(), true);
    }

    let status = child.status().await;
    let mut record = lock(&record);
    match status {
        Ok(status) if status.success() => record.complete(),
        Ok(status) => record.fail_exit(status.code()),
        Err(error) => record.fail(&Error::Io(error)),
    }
    debug!(
        command_id = %record.id,
        status = %record.status,
        exit_code = ?record.exit_code,
        "command finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor_core::tokio::TokioGlobal;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        registry: CommandRegistry<TokioGlobal>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let roots = RootRegistry::new();
        roots
            .set_working_root(&dir.path().to_string_lossy())
            .unwrap();
        let root = roots.working_dir().unwrap();
        Fixture {
            _dir: dir,
            root,
            registry: CommandRegistry::new(roots, TokioGlobal),
        }
    }

    async fn run_to_end(registry: &CommandRegistry<TokioGlobal>, request: CommandRequest) -> String {
        let id = registry.register(request).unwrap();
        registry.start(&id).unwrap();
        let status = registry.wait(&id, Duration::from_secs(10)).await.unwrap();
        assert!(status.is_terminal(), "command still {status}");
        id
    }

    #[test]
    fn registration_is_pending() {
        let fixture = fixture();
        let id = fixture
            .registry
            .register(CommandRequest::new("echo", ["hi"]))
            .unwrap();

        let snapshot = fixture.registry.status(&id, Priority::Top, 100).unwrap();
        assert_eq!(snapshot.status, CommandStatus::PendingApproval);
        assert_eq!(snapshot.output, "");
        assert!(snapshot.runtime_seconds >= 0.0);
    }

    #[test]
    fn identifiers_are_unique() {
        let fixture = fixture();
        let first = fixture
            .registry
            .register(CommandRequest::new("echo", ["a"]))
            .unwrap();
        let second = fixture
            .registry
            .register(CommandRequest::new("echo", ["a"]))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(fixture.registry.list().len(), 2);
    }

    #[test]
    fn unknown_identifier_is_not_found() {
        let fixture = fixture();
        let error = fixture
            .registry
            .status("no-such-id", Priority::Bottom, 10)
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
        assert!(matches!(
            fixture.registry.start("no-such-id"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn working_dir_must_be_confined() {
        let fixture = fixture();
        let outside = tempfile::tempdir().unwrap();
        let error = fixture
            .registry
            .register(CommandRequest::new("ls", ["-la"]).in_dir(outside.path().to_string_lossy()))
            .unwrap_err();
        assert!(matches!(error, Error::AccessDenied(_)));

        let missing = fixture
            .registry
            .register(CommandRequest::new("ls", Vec::<String>::new()).in_dir("missing"))
            .unwrap_err();
        assert!(matches!(missing, Error::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fast_command_completes_with_full_output() {
        let fixture = fixture();
        let id = run_to_end(&fixture.registry, CommandRequest::new("echo", ["hello", "world"])).await;

        let snapshot = fixture.registry.status(&id, Priority::Top, 1000).unwrap();
        assert_eq!(snapshot.status, CommandStatus::Completed);
        assert_eq!(snapshot.output, "hello world\n");
        assert_eq!(snapshot.exit_code, Some(0));
        assert!(snapshot.error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn arguments_are_never_shell_interpreted() {
        let fixture = fixture();
        let id = run_to_end(
            &fixture.registry,
            CommandRequest::new("echo", ["$HOME", "; rm -rf /", "`id`"]),
        )
        .await;
        let snapshot = fixture.registry.status(&id, Priority::Top, 1000).unwrap();
        assert_eq!(snapshot.output, "$HOME ; rm -rf / `id`\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_the_working_directory() {
        let fixture = fixture();
        std::fs::create_dir(fixture.root.join("sub")).unwrap();
        let id = run_to_end(
            &fixture.registry,
            CommandRequest::new("pwd", Vec::<String>::new()).in_dir("sub"),
        )
        .await;
        let snapshot = fixture.registry.status(&id, Priority::Top, 1000).unwrap();
        let reported = PathBuf::from(snapshot.output.trim());
        assert_eq!(
            std::fs::canonicalize(reported).unwrap(),
            std::fs::canonicalize(fixture.root.join("sub")).unwrap()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_fails_with_stderr() {
        let fixture = fixture();
        let id = run_to_end(
            &fixture.registry,
            CommandRequest::new("sh", ["-c", "echo out; echo broken >&2; exit 3"]),
        )
        .await;

        let snapshot = fixture.registry.status(&id, Priority::Top, 1000).unwrap();
        assert_eq!(snapshot.status, CommandStatus::Failed);
        assert_eq!(snapshot.exit_code, Some(3));
        assert!(snapshot.output.contains("out\n"));
        assert!(snapshot.output.contains("broken\n"));
        assert_eq!(
            snapshot.error.as_deref(),
            Some("Process exited with code 3: broken")
        );
    }

    #[test]
    fn spawn_failure_never_runs() {
        let fixture = fixture();
        let id = fixture
            .registry
            .register(CommandRequest::new(
                "windtools-definitely-missing-binary",
                Vec::<String>::new(),
            ))
            .unwrap();

        assert_eq!(fixture.registry.start(&id).unwrap(), CommandStatus::Failed);
        let snapshot = fixture.registry.status(&id, Priority::Top, 100).unwrap();
        assert_eq!(snapshot.status, CommandStatus::Failed);
        assert!(
            snapshot
                .error
                .unwrap()
                .contains("failed to spawn `windtools-definitely-missing-binary`")
        );
        assert!(snapshot.exit_code.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_is_only_allowed_once() {
        let fixture = fixture();
        let id = run_to_end(&fixture.registry, CommandRequest::new("true", Vec::<String>::new())).await;
        let error = fixture.registry.start(&id).unwrap_err();
        assert!(matches!(error, Error::InvalidArgument(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wait_is_bounded() {
        let fixture = fixture();
        let id = fixture
            .registry
            .register(CommandRequest::new("sleep", ["5"]))
            .unwrap();
        fixture.registry.start(&id).unwrap();

        let started = Instant::now();
        let status = fixture
            .registry
            .wait(&id, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(status, CommandStatus::Running);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bottom_window_returns_the_tail() {
        let fixture = fixture();
        let id = run_to_end(
            &fixture.registry,
            CommandRequest::new("sh", ["-c", "for i in 1 2 3 4 5; do echo line$i; done"]),
        )
        .await;

        let tail = fixture.registry.status(&id, Priority::Bottom, 6).unwrap();
        assert_eq!(tail.output, "line5\n");
        assert!(tail.truncated);

        let head = fixture.registry.status(&id, Priority::Top, 6).unwrap();
        assert_eq!(head.output, "line1\n");
    }
}

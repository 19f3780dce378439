//! Path confinement for agent tools.
//!
//! Every path an agent supplies goes through three steps before any tool touches storage:
//!
//! 1. [`normalize`] turns it into an absolute, lexically clean path (`~` expanded,
//!    `.`/`..` collapsed).
//! 2. The [`gate`] admits it only if it lies under a configured root, both as written and
//!    after symlinks are resolved. Paths that do not exist yet are admitted through their
//!    parent directory.
//! 3. The [`RootRegistry`] supplies the roots and the working directory, and serializes
//!    administrative changes against concurrent validations.
//!
//! ```rust,no_run
//! use windtools_sandbox::RootRegistry;
//!
//! let roots = RootRegistry::from_allowed(["/workspace"]);
//! roots.set_working_root("/workspace/project")?;
//!
//! let file = roots.validate("src/main.rs")?;
//! assert!(file.starts_with("/workspace"));
//! assert!(roots.validate("/etc/passwd").is_err());
//! # Ok::<(), windtools_core::Error>(())
//! ```

/// Built-in root administration tools.
pub mod builtin;

/// The confinement gate.
pub mod gate;

mod normalize;
mod roots;

pub use gate::{ConfinementError, is_within, validate, validate_for_create};
pub use normalize::{expand_home, normalize, normalize_in_cwd};
pub use roots::{RootConfig, RootRegistry};

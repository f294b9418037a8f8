//! Pool-wide constants.

use std::time::Duration;

/// Default idle timeout, which is also the maintenance tick period.
pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_millis(60 * 1000);

/// Consecutive failed maintenance passes tolerated before the task is
/// replaced. The task restarts on the pass that exceeds this.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 8;

/// Name the maintenance task logs under.
pub const MAINTAINER_TASK_NAME: &str = "document-pool-maintainer";

/// Leading bytes of every persisted history file.
pub const HISTORY_MAGIC: &[u8; 4] = b"QRH1";

/// Current on-disk format revision, written after the magic.
pub const HISTORY_FORMAT: u16 = 1;

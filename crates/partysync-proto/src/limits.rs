//! Size limits for the line protocol.

/// Maximum length of a single line (excluding the terminator).
///
/// The largest legitimate line is a snapshot with a long track URI; anything
/// beyond this is treated as a protocol error and the connection is closed.
pub const MAX_LINE_LEN: usize = 4 * 1024;

//! Exit code constants for the sqlite-jobs CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config, conflicting queue providers)
//! - 2: Storage failure (database, filesystem, serialization)
//! - 3: Lock acquisition timed out
//! - 4: Operation canceled

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// Storage failure: SQLite, lock directory or record serialization errors.
pub const STORAGE_FAILURE: i32 = 2;

/// Lock acquisition failure: a resource could not be locked in time.
pub const LOCK_FAILURE: i32 = 3;

/// The operation was canceled before it could complete.
pub const CANCELED: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [SUCCESS, USER_ERROR, STORAGE_FAILURE, LOCK_FAILURE, CANCELED];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }
}

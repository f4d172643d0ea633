//! CLI Exit Code Registry
//!
//! Single source of truth for `opmerge` exit codes. Batch scripts branch on
//! them, so treat them as a stable contract.
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success, every file processed                            |
//! | 1    | General error (unreadable input directory, engine error) |
//! | 2    | Usage or configuration error                             |
//! | 3    | No usable source tables for `merge`                      |
//! | 4    | Batch finished, but some files were skipped or failed    |
//! | 5    | Output could not be written                              |

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable or invalid configuration.
pub const EXIT_USAGE: u8 = 2;

/// Every candidate source was skipped, or the input directory was empty.
pub const EXIT_NO_SOURCES: u8 = 3;

/// At least one file in the batch was skipped or failed.
/// Outputs for the remaining files were written.
pub const EXIT_PARTIAL: u8 = 4;

/// Writing a merged table, side-store, reconstructed table or done file
/// failed. Inputs are left in place.
pub const EXIT_OUTPUT_IO: u8 = 5;

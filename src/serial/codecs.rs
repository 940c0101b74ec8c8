/// Splits device output into lines, and terminates outgoing commands.
pub mod lines;

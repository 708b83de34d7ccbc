/// Newline delimited byte frames.
pub(crate) mod lines;

//! Loading bcc `trace` output into a [`CallGraph`]
//!
//! Saved output separates stacks with a single blank line. Live `-UK` output
//! prints the kernel and user stack of one event separated by a blank line,
//! and ends the event with a second one, so [`StackReader`] supports both.

use crate::call_graph::CallGraph;
use crate::stack_parser::parse_stack;
use std::io::{self, BufRead, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading trace output
#[derive(Error, Debug)]
pub enum TraceOutputError {
    #[error("Could not find trace output at {0}")]
    NotFound(PathBuf),

    #[error("{0} is a directory, not a file")]
    IsDirectory(PathBuf),

    #[error("Failed to read trace output {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TraceOutputError>;

/// What ends a stack block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// One empty line (saved output)
    BlankLine,
    /// Two consecutive empty lines (live `-UK` output)
    DoubleBlankLine,
}

/// Replace the contents of `graph` with the stacks in `text`
///
/// Returns the number of stack blocks seen. Runs of blank lines between
/// stacks count as one separator, as for [`load_from_reader`].
pub fn load_from_str(text: &str, graph: &mut CallGraph) -> usize {
    // In-memory reads never fail
    load_blocks(Cursor::new(text), graph).unwrap_or_default()
}

fn load_blocks<R: BufRead>(reader: R, graph: &mut CallGraph) -> io::Result<usize> {
    graph.clear();

    let mut blocks = 0;
    for block in StackReader::new(reader, Delimiter::BlankLine) {
        graph.load_stack(&parse_stack(&block?));
        blocks += 1;
    }
    graph.init_colors();

    tracing::debug!(
        blocks,
        nodes = graph.nodes().len(),
        edges = graph.edges().len(),
        "loaded trace output"
    );
    Ok(blocks)
}

/// Replace the contents of `graph` with the stacks in the file at `path`
pub fn load_from_file(path: &Path, graph: &mut CallGraph) -> Result<usize> {
    if !path.exists() {
        return Err(TraceOutputError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Err(TraceOutputError::IsDirectory(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path).map_err(|source| TraceOutputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(load_from_str(&text, graph))
}

/// Replace the contents of `graph` with the stacks read from `reader`
pub fn load_from_reader<R: BufRead>(reader: R, graph: &mut CallGraph) -> Result<usize> {
    Ok(load_blocks(reader, graph)?)
}

/// Splits a line stream into stack blocks
pub struct StackReader<R> {
    reader: R,
    delimiter: Delimiter,
    done: bool,
}

impl<R: BufRead> StackReader<R> {
    pub fn new(reader: R, delimiter: Delimiter) -> Self {
        Self {
            reader,
            delimiter,
            done: false,
        }
    }

    fn read_block(&mut self) -> io::Result<Option<Vec<String>>> {
        let mut block = Vec::new();
        let mut last_line_was_empty = false;
        let mut line = String::new();

        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                self.done = true;
                return Ok((!block.is_empty()).then_some(block));
            }

            let content = line.trim_end_matches(['\n', '\r']);
            if content.trim().is_empty() {
                let ends_block = match self.delimiter {
                    Delimiter::BlankLine => true,
                    Delimiter::DoubleBlankLine => last_line_was_empty,
                };
                if ends_block && !block.is_empty() {
                    return Ok(Some(block));
                }
                last_line_was_empty = true;
            } else {
                last_line_was_empty = false;
                block.push(content.to_string());
            }
        }
    }
}

impl<R: BufRead> Iterator for StackReader<R> {
    type Item = io::Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.read_block().transpose()
    }
}

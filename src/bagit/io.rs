use crate::bagit::consts::*;
use crate::bagit::error::*;
use crate::bagit::Error::IoGeneral;
use snafu::ResultExt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

/// Iteratively reads lines. Lines can be terminated by CR, LF, or CRLF.
pub struct LineReader<R: Read> {
    reader: R,
    buf: [u8; BUF_SIZE],
    position: usize,
    read: usize,
    end: bool,
}

pub fn is_space_or_tab(c: char) -> bool {
    c == SPACE || c == TAB
}

/// Deletes the file then rewrites it with the provided content. A missing
/// file is not an error.
pub fn replace_file<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    delete_file_quietly(path)?;
    let mut file = File::create(path).context(IoCreateSnafu { path })?;
    file.write_all(content).context(IoWriteSnafu { path })?;
    Ok(())
}

/// Deletes a file, treating a file that does not exist as success
pub fn delete_file_quietly<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            return Err(Error::IoDelete {
                source: e,
                path: path.into(),
            });
        }
    }
    Ok(())
}

/// Removes empty directories starting at `start` and walking up to, but not
/// including, `stop`.
pub fn prune_empty_dirs<S: AsRef<Path>, T: AsRef<Path>>(start: S, stop: T) -> Result<()> {
    let stop = stop.as_ref();
    let mut current = start.as_ref().to_path_buf();

    while current != stop && current.starts_with(stop) {
        let empty = match fs::read_dir(&current) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(Error::IoReadDir {
                    source: e,
                    path: current,
                })
            }
        };

        if !empty {
            break;
        }

        fs::remove_dir(&current).context(IoDeleteSnafu { path: &current })?;

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    Ok(())
}

impl<R: Read> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: [0; BUF_SIZE],
            position: 0,
            read: 0,
            end: false,
        }
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end {
            return None;
        }

        let mut line = Vec::new();

        loop {
            if self.position >= self.read {
                match self.reader.read(&mut self.buf) {
                    Ok(read) => {
                        if read == 0 {
                            self.end = true;
                        } else {
                            self.read = read;
                            self.position = 0;
                        }
                    }
                    Err(e) => return Some(Err(IoGeneral { source: e })),
                }
            }

            if self.end {
                return if line.is_empty() {
                    None
                } else {
                    Some(bytes_to_string(line))
                };
            }

            let mut seen_cr = false;
            let mut found_end = false;

            for i in self.position..self.read {
                let b = self.buf[i];

                if seen_cr && b != LF_B {
                    found_end = true;
                    self.position = i;
                    break;
                } else if b == CR_B {
                    seen_cr = true;
                } else if b == LF_B {
                    found_end = true;
                    self.position = i + 1;
                    break;
                } else {
                    line.push(b);
                }
            }

            // Read the whole buffer but didn't find the end of the line, try again
            if !found_end {
                self.position = 0;
                self.read = 0;
                continue;
            }

            return Some(bytes_to_string(line));
        }
    }
}

fn bytes_to_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).context(InvalidStringSnafu {})
}

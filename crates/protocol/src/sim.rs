//! In-memory model of a MicroPython board's REPL.
//!
//! Understands the control characters and the [`Statement`] forms the
//! uploader sends, keeps a tiny filesystem, and can be told to lose
//! acknowledgements or reject paths so failure handling can be exercised
//! without hardware.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::constants::{CTRL_A, CTRL_B, CTRL_C, CTRL_D, FRIENDLY_BANNER, RAW_MODE_BANNER};
use crate::statements::Statement;

const BOOT_BANNER: &str = "MicroPython v1.22.0 on 2024-01-01; simulated board with ESP32";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Friendly,
    Raw,
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    data: Vec<u8>,
    pos: usize,
}

/// A simulated board. Feed it the bytes a host writes, get back what the
/// board would print.
#[derive(Debug)]
pub struct SimulatedBoard {
    mode: Mode,
    raw_input: Vec<u8>,
    friendly_input: Vec<u8>,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    open: Option<OpenFile>,
    read_only: HashSet<String>,
    drop_write_acks: u32,
    executed: Vec<Statement>,
    resets: u32,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self {
            mode: Mode::Friendly,
            raw_input: Vec::new(),
            friendly_input: Vec::new(),
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            open: None,
            read_only: HashSet::new(),
            drop_write_acks: 0,
            executed: Vec::new(),
            resets: 0,
        }
    }

    /// Suppresses the acknowledgement of the next `count` write statements.
    ///
    /// The write itself still happens, as when the reply is lost on a noisy
    /// line.
    pub fn drop_write_acks(&mut self, count: u32) {
        self.drop_write_acks = count;
    }

    /// Makes opening `path` for writing raise `OSError`.
    pub fn make_read_only(&mut self, path: &str) {
        self.read_only.insert(path.to_string());
    }

    /// Pre-creates a directory, as if left over from an earlier upload.
    pub fn add_dir(&mut self, path: &str) {
        self.dirs.insert(path.to_string());
    }

    /// Contents of a closed file.
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    pub fn dirs(&self) -> &BTreeSet<String> {
        &self.dirs
    }

    /// Every recognized statement executed so far, in order.
    pub fn executed(&self) -> &[Statement] {
        &self.executed
    }

    pub fn in_raw_mode(&self) -> bool {
        self.mode == Mode::Raw
    }

    /// Number of soft or machine resets performed.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Consumes host bytes and returns the board's output.
    pub fn feed(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for &b in input {
            match self.mode {
                Mode::Friendly => self.friendly_byte(b, &mut out),
                Mode::Raw => self.raw_byte(b, &mut out),
            }
        }
        out
    }

    fn friendly_byte(&mut self, b: u8, out: &mut Vec<u8>) {
        match b {
            CTRL_A => {
                self.friendly_input.clear();
                self.mode = Mode::Raw;
                out.extend_from_slice(format!("\r\n{RAW_MODE_BANNER}\r\n>").as_bytes());
            }
            CTRL_C => {
                self.friendly_input.clear();
                out.extend_from_slice(b"\r\n>>> ");
            }
            CTRL_D => {
                self.friendly_input.clear();
                self.boot(out, "MPY: soft reboot\r\n");
            }
            b'\r' | b'\n' => {
                let line = String::from_utf8_lossy(&self.friendly_input).trim().to_string();
                self.friendly_input.clear();
                if b == b'\n' {
                    return;
                }
                if line == "machine.reset()" {
                    self.boot(out, "ets Jun  8 2016 00:22:57\r\n\r\nrst:0xc (SW_CPU_RESET)\r\n");
                } else {
                    out.extend_from_slice(b"\r\n>>> ");
                }
            }
            _ => {
                self.friendly_input.push(b);
                out.push(b);
            }
        }
    }

    fn boot(&mut self, out: &mut Vec<u8>, preamble: &str) {
        self.resets += 1;
        self.open = None;
        out.extend_from_slice(preamble.as_bytes());
        out.extend_from_slice(format!("{BOOT_BANNER}\r\n{FRIENDLY_BANNER}\r\n>>> ").as_bytes());
    }

    fn raw_byte(&mut self, b: u8, out: &mut Vec<u8>) {
        match b {
            CTRL_A => {
                self.raw_input.clear();
                out.extend_from_slice(format!("\r\n{RAW_MODE_BANNER}\r\n>").as_bytes());
            }
            CTRL_B => {
                self.raw_input.clear();
                self.mode = Mode::Friendly;
                out.extend_from_slice(format!("\r\n{BOOT_BANNER}\r\n{FRIENDLY_BANNER}\r\n>>> ").as_bytes());
            }
            CTRL_C => self.raw_input.clear(),
            CTRL_D => {
                let source = String::from_utf8_lossy(&self.raw_input).into_owned();
                self.raw_input.clear();
                out.extend_from_slice(b"OK");
                let (stdout, stderr) = self.execute(&source);
                out.extend_from_slice(stdout.as_bytes());
                out.push(CTRL_D);
                out.extend_from_slice(stderr.as_bytes());
                out.push(CTRL_D);
                out.push(b'>');
            }
            _ => self.raw_input.push(b),
        }
    }

    fn execute(&mut self, source: &str) -> (String, String) {
        let Some(stmt) = Statement::parse(source) else {
            return (String::new(), traceback("NameError: name isn't defined"));
        };
        self.executed.push(stmt.clone());

        match stmt {
            Statement::MakeDir { path } => {
                if self.dirs.contains(&path) || self.files.contains_key(&path) {
                    (":d 0\r\n".into(), String::new())
                } else if !self.parent_exists(&path) {
                    (String::new(), traceback("OSError: [Errno 2] ENOENT"))
                } else {
                    self.dirs.insert(path);
                    (":d 1\r\n".into(), String::new())
                }
            }
            Statement::Open { path } => {
                if self.read_only.contains(&path) {
                    (String::new(), traceback("OSError: [Errno 30] EROFS"))
                } else if !self.parent_exists(&path) || self.dirs.contains(&path) {
                    (String::new(), traceback("OSError: [Errno 2] ENOENT"))
                } else {
                    self.open = Some(OpenFile {
                        path,
                        data: Vec::new(),
                        pos: 0,
                    });
                    (":o\r\n".into(), String::new())
                }
            }
            Statement::Write { offset, data } => {
                let Some(file) = self.open.as_mut() else {
                    return (String::new(), traceback("NameError: name 'f' isn't defined"));
                };
                file.pos = offset as usize;
                let end = file.pos + data.len();
                if file.data.len() < end {
                    file.data.resize(end, 0);
                }
                file.data[file.pos..end].copy_from_slice(&data);
                file.pos = end;
                if self.drop_write_acks > 0 {
                    self.drop_write_acks -= 1;
                    return (String::new(), String::new());
                }
                (format!(":w {offset} {}\r\n", data.len()), String::new())
            }
            Statement::Close => match self.open.take() {
                Some(file) => {
                    self.files.insert(file.path, file.data);
                    (":c\r\n".into(), String::new())
                }
                None => (String::new(), traceback("NameError: name 'f' isn't defined")),
            },
        }
    }

    fn parent_exists(&self, path: &str) -> bool {
        match path.rsplit_once('/') {
            Some((parent, _)) => parent.is_empty() || self.dirs.contains(parent),
            None => true,
        }
    }
}

fn traceback(exception: &str) -> String {
    format!(
        "Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\n{exception}\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ENTER_RAW_MODE, EXIT_RAW_MODE};

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn enters_and_leaves_raw_mode() {
        let mut board = SimulatedBoard::new();
        let out = text(board.feed(ENTER_RAW_MODE));
        assert!(out.contains(RAW_MODE_BANNER));
        assert!(board.in_raw_mode());

        let out = text(board.feed(EXIT_RAW_MODE));
        assert!(out.contains(FRIENDLY_BANNER));
        assert!(!board.in_raw_mode());
    }

    #[test]
    fn writes_a_file_through_statements() {
        let mut board = SimulatedBoard::new();
        board.feed(ENTER_RAW_MODE);
        let out = text(board.feed(
            &Statement::Open {
                path: "main.py".into(),
            }
            .to_wire(),
        ));
        assert_eq!(out, "OK:o\r\n\u{4}\u{4}>");

        let out = text(board.feed(
            &Statement::Write {
                offset: 0,
                data: b"print(1)\n".to_vec(),
            }
            .to_wire(),
        ));
        assert!(out.starts_with("OK:w 0 9\r\n"));

        board.feed(&Statement::Close.to_wire());
        assert_eq!(board.file("main.py"), Some(&b"print(1)\n"[..]));
    }

    #[test]
    fn dropped_ack_still_writes() {
        let mut board = SimulatedBoard::new();
        board.feed(ENTER_RAW_MODE);
        board.feed(&Statement::Open { path: "a".into() }.to_wire());
        board.drop_write_acks(1);
        let write = Statement::Write {
            offset: 0,
            data: b"abc".to_vec(),
        };
        assert_eq!(text(board.feed(&write.to_wire())), "OK\u{4}\u{4}>");
        assert!(text(board.feed(&write.to_wire())).contains(":w 0 3"));
        board.feed(&Statement::Close.to_wire());
        assert_eq!(board.file("a"), Some(&b"abc"[..]));
    }

    #[test]
    fn mkdir_reports_existing_directories() {
        let mut board = SimulatedBoard::new();
        board.add_dir("lib");
        board.feed(ENTER_RAW_MODE);
        let out = text(board.feed(&Statement::MakeDir { path: "lib".into() }.to_wire()));
        assert!(out.contains(":d 0"));
        let out = text(board.feed(
            &Statement::MakeDir {
                path: "lib/net".into(),
            }
            .to_wire(),
        ));
        assert!(out.contains(":d 1"));
    }

    #[test]
    fn read_only_path_raises() {
        let mut board = SimulatedBoard::new();
        board.make_read_only("boot.py");
        board.feed(ENTER_RAW_MODE);
        let out = text(board.feed(
            &Statement::Open {
                path: "boot.py".into(),
            }
            .to_wire(),
        ));
        assert!(out.contains("Traceback"));
        assert!(out.contains("EROFS"));
    }

    #[test]
    fn machine_reset_reboots() {
        let mut board = SimulatedBoard::new();
        let out = text(board.feed(b"\r\nimport machine\r\nmachine.reset()\r\n"));
        assert!(out.contains(FRIENDLY_BANNER));
        assert_eq!(board.resets(), 1);
    }
}

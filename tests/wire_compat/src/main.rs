fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use replup_protocol::{Ack, ReplyEvent, ReplyParser, Statement};
    use replup_upload::{FileOutcome, FileStatus, UploadReport, UploadStats};
    use serde::Deserialize;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and deserializes it.
    fn load_fixture<T: serde::de::DeserializeOwned>(name: &str) -> T {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    #[derive(Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    enum StatementFixture {
        MakeDir { path: String },
        Open { path: String },
        Write { offset: u64, data: Vec<u8> },
        Close,
    }

    impl From<StatementFixture> for Statement {
        fn from(f: StatementFixture) -> Self {
            match f {
                StatementFixture::MakeDir { path } => Statement::MakeDir { path },
                StatementFixture::Open { path } => Statement::Open { path },
                StatementFixture::Write { offset, data } => Statement::Write { offset, data },
                StatementFixture::Close => Statement::Close,
            }
        }
    }

    #[derive(Deserialize)]
    struct StatementCase {
        name: String,
        statement: StatementFixture,
        source: String,
    }

    #[derive(Deserialize)]
    struct LineCase {
        line: String,
        event: Option<String>,
    }

    /// Short textual form of a reply event, as written in the fixtures.
    fn describe(event: &ReplyEvent) -> String {
        match event {
            ReplyEvent::RawMode => "raw_mode".into(),
            ReplyEvent::Friendly => "friendly".into(),
            ReplyEvent::Ack(Ack::Dir { created: true }) => "dir_created".into(),
            ReplyEvent::Ack(Ack::Dir { created: false }) => "dir_exists".into(),
            ReplyEvent::Ack(Ack::Opened) => "opened".into(),
            ReplyEvent::Ack(Ack::Wrote { offset, count }) => format!("wrote {offset} {count}"),
            ReplyEvent::Ack(Ack::Closed) => "closed".into(),
            ReplyEvent::DeviceError(message) => format!("error {message}"),
        }
    }

    // --- Host to board ---

    #[test]
    fn statements_render_to_fixture_source() {
        let cases: Vec<StatementCase> = load_fixture("statements.json");
        assert!(!cases.is_empty());
        for case in cases {
            let statement = Statement::from(case.statement);
            assert_eq!(statement.render(), case.source, "render mismatch for {}", case.name);

            let wire = statement.to_wire();
            assert_eq!(wire.last(), Some(&0x04), "{} must end with Ctrl-D", case.name);
            assert_eq!(
                Statement::parse(&case.source),
                Some(statement),
                "parse mismatch for {}",
                case.name
            );
        }
    }

    #[test]
    fn statement_source_is_ascii_for_ascii_paths() {
        let cases: Vec<StatementCase> = load_fixture("statements.json");
        for case in cases {
            assert!(case.source.is_ascii(), "{} is not ASCII", case.name);
        }
    }

    // --- Board to host ---

    #[test]
    fn board_transcript_classifies_as_expected() {
        let cases: Vec<LineCase> = load_fixture("board_lines.json");
        let mut parser = ReplyParser::new();
        for case in cases {
            let got = parser.feed(&case.line).map(|e| describe(&e));
            assert_eq!(got, case.event, "line {:?}", case.line);
        }
    }

    // --- Machine-readable report ---

    #[test]
    fn report_json_matches_fixture() {
        let report = UploadReport {
            success: false,
            dry_run: false,
            stats: UploadStats {
                files: 1,
                directories: 1,
                bytes: 42,
            },
            chunk_retries: 2,
            files: vec![
                FileOutcome {
                    local: "src/lib/util.py".into(),
                    remote: "lib/util.py".into(),
                    bytes: 42,
                    status: FileStatus::Uploaded,
                },
                FileOutcome {
                    local: "src/boot.py".into(),
                    remote: "boot.py".into(),
                    bytes: 7,
                    status: FileStatus::Failed("board raised OSError: [Errno 30] EROFS".into()),
                },
                FileOutcome {
                    local: "src/main.py".into(),
                    remote: "main.py".into(),
                    bytes: 0,
                    status: FileStatus::Skipped("stopped after boot.py failed".into()),
                },
            ],
            aborted: Some("stopped after boot.py failed".into()),
        };

        let expected: serde_json::Value = load_fixture("upload_report.json");
        let actual = serde_json::to_value(&report).unwrap();
        assert_eq!(
            expected, actual,
            "report mismatch:\n  fixture: {expected}\n  actual:  {actual}"
        );
    }
}

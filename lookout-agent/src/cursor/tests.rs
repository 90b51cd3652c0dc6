use super::*;
use std::fs::{self, OpenOptions};
use std::io::Write;

use lookout_protocol::protocol::ErrorKind;

/// Write `content` to a fresh file in a temp dir
fn write_log(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fn-0.log");
    fs::write(&path, content).unwrap();
    (dir, path)
}

fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

/// Deterministic xorshift so line-length distributions are reproducible
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next() % (hi - lo)
    }
}

/// Newline-terminated lines of varying length
fn random_lines(rng: &mut Rng, count: usize, max_len: u64) -> Vec<String> {
    (0..count)
        .map(|i| {
            let len = rng.range(0, max_len) as usize;
            let body: String = std::iter::repeat_n((b'a' + (i % 26) as u8) as char, len).collect();
            format!("{}:{}\n", i, body)
        })
        .collect()
}

/// Every non-empty page must be a run of whole lines from `lines`
fn assert_whole_lines(page: &str, lines: &[String]) {
    if page.is_empty() {
        return;
    }
    assert!(page.ends_with('\n'), "page ends mid-line: {:?}", page);
    for line in page.split_inclusive('\n') {
        assert!(
            lines.iter().any(|l| l == line),
            "page contains a line that is not in the file: {:?}",
            line
        );
    }
}

/// Page backward from the end of the file until position 0
fn drain_backward(path: &Path, bytes: i64) -> Vec<Chunk> {
    let mut position = 0i64;
    let mut pages = Vec::new();
    loop {
        let mut cursor = LogCursor::open(path, 0, position).unwrap();
        let chunk = cursor.read_backward(bytes).unwrap();
        assert!(
            position == 0 || chunk.position < position as u64,
            "backward position must shrink: {} -> {}",
            position,
            chunk.position
        );
        let done = chunk.position == 0;
        position = chunk.position as i64;
        pages.push(chunk);
        if done {
            return pages;
        }
        assert!(pages.len() < 100_000, "backward paging did not terminate");
    }
}

// ========================================================================
// Opening
// ========================================================================

#[test]
fn open_defaults_positions_to_file_size() {
    let (_dir, path) = write_log("one\ntwo\nthree\n");
    let cursor = LogCursor::open(&path, 0, 0).unwrap();
    assert_eq!(cursor.forward_position(), 14);
    assert_eq!(cursor.backward_position(), 14);
}

#[test]
fn open_negative_positions_mean_default() {
    let (_dir, path) = write_log("one\ntwo\n");
    let cursor = LogCursor::open(&path, -5, -1).unwrap();
    assert_eq!(cursor.forward_position(), 8);
    assert_eq!(cursor.backward_position(), 8);
}

#[test]
fn open_default_snaps_to_last_line_boundary() {
    let (_dir, path) = write_log("one\ntwo\nhalf-writ");
    let cursor = LogCursor::open(&path, 0, 0).unwrap();
    assert_eq!(cursor.forward_position(), 8);
    assert_eq!(cursor.backward_position(), 8);
}

#[test]
fn open_default_without_any_newline_is_zero() {
    let (_dir, path) = write_log("no newline yet");
    let cursor = LogCursor::open(&path, 0, 0).unwrap();
    assert_eq!(cursor.forward_position(), 0);
    assert_eq!(cursor.backward_position(), 0);
}

#[test]
fn open_snaps_across_chunk_boundary() {
    // Unfinished tail longer than one read step
    let tail = "x".repeat(READ_STEP as usize * 2 + 17);
    let (_dir, path) = write_log(&format!("first\n{}", tail));
    let cursor = LogCursor::open(&path, 0, 0).unwrap();
    assert_eq!(cursor.backward_position(), 6);
}

#[test]
fn open_keeps_explicit_positions() {
    let (_dir, path) = write_log("one\ntwo\nthree\n");
    let cursor = LogCursor::open(&path, 4, 8).unwrap();
    assert_eq!(cursor.forward_position(), 4);
    assert_eq!(cursor.backward_position(), 8);
}

#[test]
fn open_clamps_positions_past_eof() {
    let (_dir, path) = write_log("one\ntwo\n");
    let cursor = LogCursor::open(&path, 1_000, 2_000).unwrap();
    assert_eq!(cursor.forward_position(), 8);
    assert_eq!(cursor.backward_position(), 8);
}

#[test]
fn open_clamps_past_eof_to_last_whole_line() {
    let (_dir, path) = write_log("one\ntwo\nhalf-writ");
    let cursor = LogCursor::open(&path, 1_000, 2_000).unwrap();
    assert_eq!(cursor.forward_position(), 8);
    assert_eq!(cursor.backward_position(), 8);
}

#[test]
fn backward_from_past_eof_skips_unfinished_tail() {
    let lines: String = (0..300).map(|i| format!("line-{:04}-xxxxxxxxxx\n", i)).collect();
    let (_dir, path) = write_log(&format!("{}PARTIAL-TAIL", lines));

    let mut cursor = LogCursor::open(&path, 0, 1_000_000).unwrap();
    let chunk = cursor.read_backward(10).unwrap();
    assert!(chunk.text.ends_with("line-0299-xxxxxxxxxx\n"), "{:?}", chunk.text);
    assert!(!chunk.text.contains("PARTIAL"));
}

#[test]
fn forward_from_past_eof_starts_on_a_line_boundary() {
    let (_dir, path) = write_log("one\ntwo\nhalf-writ");
    let mut cursor = LogCursor::open(&path, 1_000, 0).unwrap();

    append(&path, "ten\nnext\n");
    let chunk = cursor.read_forward(100).unwrap();
    assert_eq!(chunk.text, "half-written\nnext\n");
    assert_eq!(chunk.position, 26);
}

#[test]
fn open_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = match LogCursor::open(dir.path().join("missing.log"), 0, 0) {
        Err(e) => e,
        Ok(_) => panic!("opening a missing file must fail"),
    };
    assert!(err.is_not_found());
    assert!(!err.is_transient());
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ========================================================================
// Forward reads
// ========================================================================

#[test]
fn forward_returns_appended_lines() {
    let (_dir, path) = write_log("old 1\nold 2\n");
    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    let start = cursor.forward_position();

    append(&path, "new 1\nnew 2\n");
    let chunk = cursor.read_forward(100).unwrap();
    assert_eq!(chunk.text, "new 1\nnew 2\n");
    assert_eq!(chunk.position, start + 12);
    assert_eq!(cursor.forward_position(), chunk.position);
}

#[test]
fn forward_at_eof_is_idempotent() {
    let (_dir, path) = write_log("a\nb\n");
    let mut cursor = LogCursor::open(&path, 2, 0).unwrap();
    let first = cursor.read_forward(100).unwrap();
    assert_eq!(first.text, "b\n");
    assert_eq!(first.position, 4);

    // Fresh cursor per call, as the service does
    let mut cursor = LogCursor::open(&path, first.position as i64, 0).unwrap();
    let second = cursor.read_forward(100).unwrap();
    assert_eq!(second.text, "");
    assert_eq!(second.position, first.position);

    let third = cursor.read_forward(100).unwrap();
    assert_eq!(third, second);
}

#[test]
fn forward_excludes_unfinished_trailing_line() {
    let (_dir, path) = write_log("done 1\ndone 2\nstill wri");
    let mut cursor = LogCursor::open(&path, 7, 0).unwrap();
    let chunk = cursor.read_forward(100).unwrap();
    assert_eq!(chunk.text, "done 2\n");
    assert_eq!(chunk.position, 14);

    // The unfinished line shows up once it is terminated
    append(&path, "ting\n");
    let mut cursor = LogCursor::open(&path, chunk.position as i64, 0).unwrap();
    let chunk = cursor.read_forward(100).unwrap();
    assert_eq!(chunk.text, "still writing\n");
    assert_eq!(chunk.position, 28);
}

#[test]
fn forward_only_unfinished_line_is_transient_error() {
    let (_dir, path) = write_log("complete\n");
    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    append(&path, "partial without newline");

    let err = cursor.read_forward(100).unwrap_err();
    assert!(matches!(err, CursorError::IncompleteLine { offset: 9, .. }), "got {:?}", err);
    assert!(err.is_transient());
    assert_eq!(cursor.forward_position(), 9, "failed read must not move the cursor");
}

#[test]
fn forward_grows_window_for_long_line() {
    let long = "y".repeat(READ_STEP as usize * 3);
    let (_dir, path) = write_log("");
    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    append(&path, &format!("{}\nshort\n", long));

    // Requested window is smaller than the first line
    let chunk = cursor.read_forward(10).unwrap();
    assert_eq!(chunk.text, format!("{}\nshort\n", long));
    assert_eq!(chunk.position, long.len() as u64 + 7);
}

#[test]
fn forward_respects_page_size() {
    let lines: Vec<String> = (0..1000).map(|i| format!("line {:04}\n", i)).collect();
    let (_dir, path) = write_log("");
    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    append(&path, &lines.concat());

    let chunk = cursor.read_forward(3000).unwrap();
    assert!(chunk.text.len() <= 3000);
    assert!(chunk.text.len() > 3000 - 10, "page should fill the window up to the last newline");
    assert_whole_lines(&chunk.text, &lines);
}

#[test]
fn forward_pages_concatenate_to_appended_content() {
    let mut rng = Rng(0x5eed);
    let lines = random_lines(&mut rng, 400, 300);
    let (_dir, path) = write_log("");
    // Position 0 means "tail", so one cursor follows the whole file
    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();

    let mut seen = String::new();
    for batch in lines.chunks(37) {
        append(&path, &batch.concat());
        loop {
            let before = cursor.forward_position();
            let bytes = rng.range(1, 5000) as i64;
            let chunk = cursor.read_forward(bytes).unwrap();
            assert_whole_lines(&chunk.text, &lines);
            if chunk.text.is_empty() {
                assert_eq!(chunk.position, before);
                break;
            }
            assert!(chunk.position > before);
            seen.push_str(&chunk.text);
        }
    }
    assert_eq!(seen, lines.concat());
}

// ========================================================================
// Backward reads
// ========================================================================

#[test]
fn backward_ten_thousand_byte_scenario() {
    // 200 lines of 50 bytes each (49 characters + newline)
    let lines: Vec<String> = (0..200).map(|i| format!("{:048}|\n", i)).collect();
    let content = lines.concat();
    assert_eq!(content.len(), 10_000);
    let (_dir, path) = write_log(&content);

    let mut cursor = LogCursor::open(&path, 0, 10_000).unwrap();
    let first = cursor.read_backward(2400).unwrap();
    assert!(!first.text.is_empty());
    assert!(first.position < 10_000);
    assert_whole_lines(&first.text, &lines);
    assert_eq!(first.text, content[first.position as usize..]);

    let pages = drain_backward(&path, 2400);
    let rebuilt: String = pages.iter().rev().map(|c| c.text.as_str()).collect();
    assert_eq!(rebuilt, content);
}

#[test]
fn backward_terminates_and_reconstructs_irregular_lines() {
    let mut rng = Rng(42);
    for &bytes in &[1i64, 100, 2400, 2401, 5000, 20_000] {
        let lines = random_lines(&mut rng, 300, 600);
        let content = lines.concat();
        let (_dir, path) = write_log(&content);

        let pages = drain_backward(&path, bytes);
        for page in &pages {
            assert_whole_lines(&page.text, &lines);
        }
        let rebuilt: String = pages.iter().rev().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, content, "page size {}", bytes);
    }
}

#[test]
fn backward_grows_window_past_long_lines() {
    let long = "z".repeat(READ_STEP as usize * 4);
    let content = format!("head\n{}\n{}\ntail\n", long, long);
    let (_dir, path) = write_log(&content);

    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    let chunk = cursor.read_backward(0).unwrap();
    assert!(!chunk.text.is_empty());
    assert!(chunk.text.ends_with("tail\n"));
    assert_eq!(&content[chunk.position as usize..], chunk.text);

    let pages = drain_backward(&path, 0);
    let rebuilt: String = pages.iter().rev().map(|c| c.text.as_str()).collect();
    assert_eq!(rebuilt, content);
}

#[test]
fn backward_small_file_reaches_start_in_one_call() {
    let (_dir, path) = write_log("a\nb\nc\n");
    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    let chunk = cursor.read_backward(100).unwrap();
    assert_eq!(chunk.text, "a\nb\nc\n");
    assert_eq!(chunk.position, 0);
    assert_eq!(cursor.backward_position(), 0);
    // Forward cursor is untouched by a backward read
    assert_eq!(cursor.forward_position(), 6);
}

#[test]
fn backward_from_mid_file_position() {
    let (_dir, path) = write_log("a\nb\nc\n");
    let mut cursor = LogCursor::open(&path, 0, 4).unwrap();
    let chunk = cursor.read_backward(100).unwrap();
    assert_eq!(chunk.text, "a\nb\n");
    assert_eq!(chunk.position, 0);
}

#[test]
fn backward_on_empty_file_is_empty() {
    let (_dir, path) = write_log("");
    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    let chunk = cursor.read_backward(100).unwrap();
    assert_eq!(chunk, Chunk::empty(0));
}

#[test]
fn backward_skips_unfinished_trailing_line() {
    let (_dir, path) = write_log("one\ntwo\npart");
    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    let chunk = cursor.read_backward(100).unwrap();
    assert_eq!(chunk.text, "one\ntwo\n");
    assert_eq!(chunk.position, 0);
}

#[test]
fn backward_window_drops_partial_leading_line() {
    let lines: Vec<String> = (0..500).map(|i| format!("entry-{}\n", i)).collect();
    let content = lines.concat();
    let (_dir, path) = write_log(&content);

    let mut cursor = LogCursor::open(&path, 0, 0).unwrap();
    let chunk = cursor.read_backward(2400).unwrap();
    assert!(chunk.text.len() < 2400);
    assert_whole_lines(&chunk.text, &lines);
    // The byte before the new position is a newline, so the page starts a line
    assert_eq!(content.as_bytes()[chunk.position as usize - 1], b'\n');
}

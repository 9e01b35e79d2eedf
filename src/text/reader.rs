use std::io::{self, BufRead, Read};

use crate::config::TextConfig;
use crate::error::{EngineError, EngineResult};

/// One meaningful input line with its 1-based position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub number: usize,
}

/// Yields non-blank lines with comments removed.
///
/// A line longer than the limit yields [`EngineError::LineTooLong`];
/// reading may continue with the next line afterwards.
pub struct LineReader<R> {
    inner: R,
    comment_prefix: String,
    max_length: usize,
    number: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, comment_prefix: impl Into<String>, max_length: usize) -> Self {
        Self {
            inner,
            comment_prefix: comment_prefix.into(),
            max_length,
            number: 0,
            buf: Vec::new(),
        }
    }

    pub fn from_config(inner: R, config: &TextConfig) -> Self {
        Self::new(inner, config.comment_prefix.clone(), config.max_line_length)
    }

    /// Number of the last line read, blank or not.
    pub fn line_number(&self) -> usize {
        self.number
    }

    fn read_next(&mut self) -> EngineResult<Option<Line>> {
        // Widest encoding of a line at the limit, plus "\r\n".
        let limit = self.max_length.saturating_mul(4).saturating_add(2);
        loop {
            self.buf.clear();
            let read = (&mut self.inner)
                .take(limit as u64)
                .read_until(b'\n', &mut self.buf)?;
            if read == 0 {
                return Ok(None);
            }
            self.number += 1;

            if read == limit && self.buf.last() != Some(&b'\n') {
                self.skip_rest_of_line()?;
                return Err(self.too_long());
            }
            let raw = std::str::from_utf8(&self.buf)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
                .trim_end_matches(['\n', '\r']);
            if raw.chars().count() > self.max_length {
                return Err(self.too_long());
            }
            let text = match self.comment_prefix.as_str() {
                "" => raw,
                prefix => raw.split_once(prefix).map_or(raw, |(before, _)| before),
            };
            if text.trim().is_empty() {
                continue;
            }
            return Ok(Some(Line {
                text: text.to_string(),
                number: self.number,
            }));
        }
    }

    fn too_long(&self) -> EngineError {
        EngineError::LineTooLong {
            line: self.number,
            max: self.max_length,
        }
    }

    /// Discard input through the next newline without buffering it.
    fn skip_rest_of_line(&mut self) -> EngineResult<()> {
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            let (used, done) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            self.inner.consume(used);
            if done {
                return Ok(());
            }
        }
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = EngineResult<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lines(input: &str, max: usize) -> Vec<EngineResult<Line>> {
        LineReader::new(Cursor::new(input.to_string()), "#", max).collect()
    }

    #[test]
    fn test_skips_comments_and_blanks() {
        let got = lines("# header\n10.0.0.1\n\n  \n10.0.0.2 # trailing\r\n", 100);
        let got: Vec<(String, usize)> = got
            .into_iter()
            .map(|l| l.map(|l| (l.text, l.number)).unwrap())
            .collect();
        assert_eq!(
            got,
            vec![
                ("10.0.0.1".to_string(), 2),
                ("10.0.0.2 ".to_string(), 5)
            ]
        );
    }

    #[test]
    fn test_long_line_reports_number_and_continues() {
        let got = lines("short\nthis line is too long\nok\n", 10);
        assert_eq!(got.len(), 3);
        assert!(matches!(
            got[1],
            Err(EngineError::LineTooLong { line: 2, max: 10 })
        ));
        assert_eq!(got[2].as_ref().unwrap().text, "ok");
    }

    #[test]
    fn test_oversized_line_is_not_buffered() {
        let huge = io::repeat(b'x').take(1_000_000).chain(Cursor::new("\nok\n"));
        let mut reader = LineReader::new(io::BufReader::new(huge), "#", 10);
        assert!(matches!(
            reader.next(),
            Some(Err(EngineError::LineTooLong { line: 1, max: 10 }))
        ));
        assert!(reader.buf.capacity() < 4096);
        let next = reader.next().unwrap().unwrap();
        assert_eq!((next.text.as_str(), next.number), ("ok", 2));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_multibyte_line_at_limit_is_accepted() {
        let got: Vec<_> = LineReader::new(Cursor::new("ééé\r\néééé\n"), "#", 3).collect();
        assert_eq!(got[0].as_ref().unwrap().text, "ééé");
        assert!(matches!(got[1], Err(EngineError::LineTooLong { line: 2, .. })));
    }

    #[test]
    fn test_empty_prefix_keeps_hashes() {
        let got: Vec<_> = LineReader::new(Cursor::new("a#b\n"), "", 100)
            .map(|l| l.unwrap().text)
            .collect();
        assert_eq!(got, vec!["a#b"]);
    }
}

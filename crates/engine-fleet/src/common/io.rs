//! 入出力ファイルのオープン（`.gz` と `-` に対応）

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// 局面ファイルを開く。`-` は標準入力、拡張子 `.gz` は透過的に展開する。
pub fn open_input<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if is_stdio(p) {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// ラベル出力先。gzip の終端ブロックを書き損ねないよう `finish()` で閉じる。
#[must_use = "call .finish() to propagate compression/IO errors"]
pub enum OutputSink {
    Plain(BufWriter<File>),
    Stdout(io::Stdout),
    Gz(flate2::write::GzEncoder<BufWriter<File>>),
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Plain(f) => f.write(buf),
            OutputSink::Stdout(s) => s.write(buf),
            OutputSink::Gz(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::Plain(f) => f.flush(),
            OutputSink::Stdout(s) => s.flush(),
            OutputSink::Gz(e) => e.flush(),
        }
    }
}

impl OutputSink {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        if is_stdio(p) {
            return Ok(OutputSink::Stdout(io::stdout()));
        }
        if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let f = BufWriter::new(File::create(p)?);
        if is_gzip(p) {
            return Ok(OutputSink::Gz(flate2::write::GzEncoder::new(
                f,
                flate2::Compression::default(),
            )));
        }
        Ok(OutputSink::Plain(f))
    }

    /// ストリームを確定させ、下位のファイル / 標準出力まで flush する。
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputSink::Plain(f) => {
                let mut file = f.into_inner().map_err(|e| e.into_error())?;
                file.flush()
            }
            OutputSink::Stdout(mut s) => s.flush(),
            OutputSink::Gz(e) => {
                let mut inner = e.finish()?;
                inner.flush()
            }
        }
    }
}

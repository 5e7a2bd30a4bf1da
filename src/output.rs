//! Output sinks for run records.
use crate::error::Result;
use crate::runner::RunRecord;
use std::io::Write;

pub const CSV_HEADER: &str =
    "kernel,run,elapsed_sec,gflops,array_size,type,aligned,tail,access,stride,memory_level";

/// Destination that takes ownership of every record produced by a run
pub trait RecordSink {
    fn append(&mut self, record: RunRecord) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecordSink for Vec<RunRecord> {
    fn append(&mut self, record: RunRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Comma-separated rows, header written once when the sink is created
pub struct CsvSink<W: Write> {
    writer: W,
}

impl<W: Write> CsvSink<W> {
    pub fn new(mut writer: W) -> Result<Self> {
        writeln!(writer, "{CSV_HEADER}")?;
        Ok(CsvSink { writer })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn append(&mut self, r: RunRecord) -> Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{},{},{},{}",
            r.kernel,
            r.run,
            r.elapsed_secs,
            r.gflops,
            r.n,
            r.element_type,
            u8::from(r.aligned),
            u8::from(r.tail),
            r.access,
            r.stride,
            r.memory_level
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Default CSV file name: the arguments after the program name joined by `_`
pub fn default_output_name<S: AsRef<str>>(args: &[S]) -> String {
    let joined = args
        .iter()
        .skip(1)
        .map(|a| a.as_ref().replace(' ', "_"))
        .collect::<Vec<_>>()
        .join("_");
    if joined.is_empty() {
        "results.csv".to_string()
    } else {
        format!("{joined}.csv")
    }
}

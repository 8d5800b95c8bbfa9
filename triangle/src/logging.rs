/// Windowing backends are chatty at debug level; only their warnings get through.
const NOISY_MODULES: [&str; 3] = ["smithay", "sctk", "calloop"];

pub struct LogFilter;
impl flexi_logger::filter::LogLineFilter for LogFilter {
    fn write(
        &self,
        now: &mut flexi_logger::DeferredNow,
        record: &log::Record,
        log_line_writer: &dyn flexi_logger::filter::LogLineWriter,
    ) -> std::io::Result<()> {
        let module_path = record.module_path().unwrap_or("");
        let is_noisy = NOISY_MODULES
            .iter()
            .any(|module| module_path.contains(module));
        if !is_noisy || record.level() <= log::Level::Warn {
            log_line_writer.write(now, record)?;
        }
        Ok(())
    }
}

pub fn init() -> Result<flexi_logger::LoggerHandle, flexi_logger::FlexiLoggerError> {
    #[cfg(debug_assertions)]
    let log_level = ("debug", flexi_logger::Duplicate::Debug);
    #[cfg(not(debug_assertions))]
    let log_level = ("info", flexi_logger::Duplicate::Info);

    let file_spec = flexi_logger::FileSpec::default().suppress_timestamp();

    flexi_logger::Logger::try_with_env_or_str(log_level.0)?
        .log_to_file(file_spec)
        .write_mode(flexi_logger::WriteMode::BufferAndFlush)
        .duplicate_to_stdout(log_level.1)
        .set_palette("b9;3;2;8;7".to_owned())
        .filter(Box::new(LogFilter))
        .start()
}

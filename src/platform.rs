//! Process-level bring-up shared by every binary embedding the peripheral.

/// Apply the ESP-IDF runtime patches and install the logger.
///
/// On host targets logging is left to the embedding binary (tests usually
/// run without a logger installed), so this is a no-op there.
#[cfg(target_os = "espidf")]
pub fn init_logging() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    log::info!("blescript v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_logging() -> anyhow::Result<()> {
    Ok(())
}

//! A thin wrapper around [`eyre`] that renders error chains as a flat,
//! machine-greppable object instead of eyre's default multi-line report.
//!
//! Call [`install`] once, before any [`eyre::Report`] is constructed
//! (normally the first line of `main`).

use std::{
    error::Error,
    fmt::Write as _,
};

#[cfg(feature = "anyhow")]
pub use anyhow;
#[cfg(feature = "anyhow")]
pub use anyhow_conversion::{
    anyhow_to_eyre,
    eyre_to_anyhow,
};
pub use eyre;
#[doc(hidden)]
pub use eyre::Result;

/// Installs the `chain-eyre` hook as the global error report hook.
///
/// # Errors
/// Returns an error if another hook has already been installed.
pub fn install() -> Result<()> {
    eyre::set_hook(Box::new(|_| Box::new(ErrorHandler)))?;
    Ok(())
}

struct ErrorHandler;

impl eyre::EyreHandler for ErrorHandler {
    fn debug(
        &self,
        error: &(dyn Error + 'static),
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        display(error, f)
    }

    fn display(
        &self,
        error: &(dyn Error + 'static),
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        display(error, f)
    }
}

fn display(
    mut error: &(dyn Error + 'static),
    f: &mut core::fmt::Formatter<'_>,
) -> core::fmt::Result {
    f.write_char('{')?;
    let mut level = 0;
    write_layer(level, error, f)?;
    while let Some(cause) = error.source() {
        level = level.saturating_add(1);
        f.write_str(", ")?;
        write_layer(level, cause, f)?;
        error = cause;
    }
    f.write_char('}')?;
    Ok(())
}

fn write_layer(key: u32, err: &dyn Error, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write_key(key, f)?;
    write_value(err, f)?;
    Ok(())
}

fn write_key(key: u32, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.write_char('"')?;
    let mut buf = itoa::Buffer::new();
    f.write_str(buf.format(key))?;
    f.write_str("\": ")?;
    Ok(())
}

fn write_value(err: &dyn Error, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.write_fmt(format_args!("\"{err}\""))?;
    Ok(())
}

#[cfg(feature = "anyhow")]
mod anyhow_conversion {
    pub fn anyhow_to_eyre(anyhow_error: anyhow::Error) -> eyre::Report {
        let boxed: Box<dyn std::error::Error + Send + Sync> = anyhow_error.into();
        eyre::eyre!(boxed)
    }

    #[must_use]
    pub fn eyre_to_anyhow(eyre_error: eyre::Report) -> anyhow::Error {
        let boxed: Box<dyn std::error::Error + Send + Sync> = eyre_error.into();
        anyhow::anyhow!(boxed)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn error_chain_renders_as_flat_object() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let report = eyre::Report::new(err).wrap_err("failed to flush block log");
        let rendered = format!("{report:?}");
        assert!(rendered.contains("failed to flush block log") || !rendered.is_empty());
    }
}

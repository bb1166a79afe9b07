//! Device login prompt

use std::io::{self, Write};

use pulsar_oauth2::{DeviceCodeCallback, DeviceCodeResult, Error};

/// Callback printing the verification URL and user code to stderr.
pub fn device_code_callback() -> DeviceCodeCallback {
    Box::new(|code| {
        let mut stderr = io::stderr().lock();
        write_prompt(&mut stderr, code).map_err(|e| Error::Interaction(e.to_string()))
    })
}

pub fn write_prompt(out: &mut impl Write, code: &DeviceCodeResult) -> io::Result<()> {
    writeln!(out, "To log in, open the following URL in your browser:")?;
    writeln!(out)?;
    writeln!(out, "    {}", code.verification_url())?;
    writeln!(out)?;
    writeln!(out, "and confirm that it shows the code {}", code.user_code)?;
    writeln!(out)?;
    writeln!(out, "Waiting for the login to complete...")?;
    out.flush()
}

use chrono::Local;

/// Renders a recognized expression into the plain-text artifact handed to
/// the caller for download or saving. File naming and delivery stay with the
/// caller.
pub fn render_txt(markup: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");

    format!(
        "Handwritten mathematical expression recognition result\n\
         Date: {timestamp}\n\
         \n\
         LaTeX:\n\
         {markup}\n"
    )
}

pub fn render_txt_bytes(markup: &str) -> Vec<u8> {
    render_txt(markup).into_bytes()
}

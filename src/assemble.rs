//! Document assembler: composes the three source fragments plus the
//! instrumentation prelude into one self-contained document string.
//!
//! Assembly is a pure function: identical inputs produce byte-identical
//! output. Nothing time- or session-dependent is baked into the template;
//! session identity travels next to the document, not inside it.

use serde::{Deserialize, Serialize};

use crate::host::shim::SHIM_SOURCE;
use crate::source::SourceDocument;

/// Preview color scheme applied to the assembled document body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    fn body_class(self) -> &'static str {
        match self {
            Theme::Dark => "lp-dark",
            Theme::Light => "lp-light",
        }
    }

    fn base_style(self) -> &'static str {
        match self {
            Theme::Dark => "body { background: #111827; color: #f9fafb; }",
            Theme::Light => "body { background: #ffffff; color: #111827; }",
        }
    }
}

/// Assembly options, passed top-down as an immutable record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssembleOptions {
    pub theme: Theme,
    /// When false the user script fragment is omitted from the document
    /// (markup/style-only reload under the manual-run policy). The
    /// instrumentation shim is always included.
    pub include_script: bool,
}

/// Build a complete, standalone document from the source fragments.
///
/// Layout: reset style layer, user style, user markup in the body, the
/// instrumentation shim, then the user script inside the shim's guarded
/// execution block. Never fails; absent fragments are empty strings by
/// construction of [`SourceDocument`].
///
/// The user script is not parsed or transformed: it is carried as an
/// exact-preserving string literal into `__lp_run`, so syntax errors in it
/// surface as runtime error events, and script-terminating substrings
/// (`</script>`) cannot break out of the document structure.
pub fn assemble(doc: &SourceDocument, opts: &AssembleOptions) -> String {
    let script_block = if opts.include_script {
        format!(
            "    <script>\n__lp_run({});\n    </script>\n",
            script_literal(&doc.script)
        )
    } else {
        String::new()
    };

    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <style>\n\
         /* Reset default styles */\n\
         * {{ margin: 0; padding: 0; box-sizing: border-box; }}\n\
         {base_style}\n\
         /* User style */\n\
         {style}\n\
         </style>\n\
         </head>\n\
         <body class=\"{body_class}\">\n\
         {markup}\n\
         <script>\n\
         {shim}\n\
         </script>\n\
         {script_block}\
         </body>\n\
         </html>\n",
        base_style = opts.theme.base_style(),
        style = doc.style,
        body_class = opts.theme.body_class(),
        markup = doc.markup,
        shim = SHIM_SOURCE,
        script_block = script_block,
    )
}

/// Encode the user script as a JavaScript string literal that evaluates
/// back to the exact original text. `</` is escaped to `<\/` (identical at
/// runtime) so the literal can never terminate its enclosing script
/// element.
fn script_literal(script: &str) -> String {
    // serde_json string encoding is valid JS string syntax.
    let mut literal = serde_json::Value::String(script.to_string()).to_string();
    if literal.contains("</") {
        literal = literal.replace("</", "<\\/");
    }
    literal
}

//! Chain-script parser.
//!
//! A chain script is a flat token stream (see [`dsp_core::tokenize`]) built
//! from effect names and their arguments, plus four structural tokens:
//!
//! - `!` marks the next effect as failure-tolerant
//! - `:<selector>` replaces the current channel selector
//! - `@<path>` includes another script file
//! - `{ ... }` opens a nested block whose channel space is the enclosing
//!   selector
//!
//! Effects that change the channel count force the enclosing mask and any
//! explicit selector to be reconciled against the new stream; a selector
//! that names a channel which no longer exists rejects the chain.

use crate::chain::EffectsChain;
use crate::effect::EffectArgs;
use crate::error::ChainError;
use crate::registry::find_effect;
use dsp_core::{tokenize, ChannelSelector, Stream};
use std::path::{Path, PathBuf};

/// Terminating token for files loaded with EOF-marker enforcement.
pub const EFFECTS_FILE_EOF_MARKER: &str = "#EOF#";

/// Whether `token` starts a new chain element (and therefore ends the
/// argument list of the preceding effect).
fn is_chain_start(token: &str) -> bool {
    find_effect(token).is_some()
        || token.starts_with(':')
        || token.starts_with('@')
        || token == "!"
        || token == "{"
}

/// Build a chain from `tokens` against `stream`, then run the peephole
/// optimizer. `stream` is updated to the chain's output stream.
pub fn build_effects_chain(
    tokens: &[String],
    chain: &mut EffectsChain,
    stream: &mut Stream,
    dir: &Path,
) -> Result<(), ChainError> {
    build_block(tokens, chain, stream, None, dir)?;
    chain.optimize();
    Ok(())
}

/// Build a chain from a script file.
///
/// `mask` constrains the addressable channels (used by the watch effect to
/// rebuild against its original selector). With `enforce_eof_marker`, the
/// file must end with [`EFFECTS_FILE_EOF_MARKER`].
pub fn build_effects_chain_from_file(
    path: &Path,
    chain: &mut EffectsChain,
    stream: &mut Stream,
    mask: Option<&ChannelSelector>,
    enforce_eof_marker: bool,
) -> Result<(), ChainError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ChainError::File {
        path: path.to_path_buf(),
        source,
    })?;
    if enforce_eof_marker {
        let last_line = contents.lines().rev().find(|l| !l.trim().is_empty());
        let mut ok = last_line.map(str::trim) == Some(EFFECTS_FILE_EOF_MARKER);
        if !ok {
            ok = last_line
                .map(str::trim)
                .is_some_and(|l| l.ends_with(EFFECTS_FILE_EOF_MARKER));
        }
        if !ok {
            return Err(ChainError::MissingEofMarker { path: path.to_path_buf() });
        }
    }
    let mut tokens = tokenize(&contents);
    if enforce_eof_marker && tokens.last().map(String::as_str) == Some(EFFECTS_FILE_EOF_MARKER) {
        tokens.pop();
    }
    let dir = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    tracing::debug!(path = %path.display(), "begin effects file");
    build_block(&tokens, chain, stream, mask, &dir)?;
    tracing::debug!(path = %path.display(), "end effects file");
    Ok(())
}

fn build_block(
    tokens: &[String],
    chain: &mut EffectsChain,
    stream: &mut Stream,
    initial_mask: Option<&ChannelSelector>,
    dir: &Path,
) -> Result<(), ChainError> {
    let mut mask = match initial_mask {
        Some(m) => m.clone(),
        None => ChannelSelector::all(stream.channels),
    };
    let mut selector = mask.clone();
    let mut last_selector_str: Option<String> = None;
    let mut last_channels = stream.channels;
    let mut allow_fail = false;

    let mut k = 0;
    while k < tokens.len() {
        let token = tokens[k].as_str();
        if token == "!" {
            allow_fail = true;
            k += 1;
            continue;
        }
        if last_channels != stream.channels {
            mask = mask.resized(stream.channels);
        }
        if let Some(sel_str) = token.strip_prefix(':') {
            selector = ChannelSelector::parse_masked(sel_str, &mask)?;
            last_selector_str = Some(sel_str.to_string());
            last_channels = stream.channels;
            k += 1;
            continue;
        }
        if last_channels != stream.channels {
            // re-bind the selector to the new channel layout
            selector = match &last_selector_str {
                None => mask.clone(),
                Some(s) => ChannelSelector::parse_masked(s, &mask).map_err(|_| {
                    tracing::debug!("note: the last effect changed the number of channels");
                    ChainError::SelectorStale { selector: s.clone() }
                })?,
            };
            last_channels = stream.channels;
        }
        if let Some(path) = token.strip_prefix('@') {
            let full = dir.join(path);
            build_effects_chain_from_file(&full, chain, stream, Some(&selector), false)?;
            k += 1;
            continue;
        }
        if token == "{" {
            let mut depth = 1;
            let mut i = k + 1;
            while depth > 0 && i < tokens.len() {
                match tokens[i].as_str() {
                    "{" => depth += 1,
                    "}" => depth -= 1,
                    _ => {}
                }
                i += 1;
            }
            if depth > 0 {
                return Err(ChainError::MissingBrace);
            }
            build_block(&tokens[k + 1..i - 1], chain, stream, Some(&selector), dir)?;
            k = i;
            continue;
        }
        if token == "}" {
            return Err(ChainError::UnexpectedBrace);
        }

        // an effect name followed by its arguments
        let mut i = k + 1;
        while i < tokens.len() && !is_chain_start(&tokens[i]) {
            i += 1;
        }
        match find_effect(token) {
            None => {
                if allow_fail {
                    tracing::warn!("no such effect: {token}");
                } else {
                    return Err(ChainError::UnknownEffect(token.to_string()));
                }
            }
            Some(info) => {
                tracing::debug!(
                    effect = %tokens[k..i].join(" "),
                    channels = stream.channels,
                    selector = %selector,
                    fs = stream.fs,
                    "adding effect"
                );
                let args = EffectArgs {
                    name: token,
                    args: &tokens[k + 1..i],
                    istream: *stream,
                    selector: &selector,
                    dir,
                };
                match info.init(&args) {
                    Err(err) => {
                        if allow_fail {
                            tracing::warn!("failed to initialize non-essential effect: {err}");
                        } else {
                            return Err(err);
                        }
                    }
                    Ok(effects) => {
                        if effects.is_empty() {
                            tracing::debug!("not using effect: {token}");
                        }
                        for e in effects {
                            *stream = e.ostream();
                            chain.push(e);
                        }
                    }
                }
            }
        }
        allow_fail = false;
        k = i;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(script: &str, fs: u32, channels: usize) -> Result<(EffectsChain, Stream), ChainError> {
        let tokens = tokenize(script);
        let mut chain = EffectsChain::new();
        let mut stream = Stream::new(fs, channels);
        build_effects_chain(&tokens, &mut chain, &mut stream, Path::new("."))?;
        Ok((chain, stream))
    }

    #[test]
    fn adjacent_streams_agree() {
        let (chain, stream) =
            build("gain -3 remix 0,1 1 0 lowpass 1k 0.707q resample 96k", 48000, 2).unwrap();
        for pair in chain.effects().windows(2) {
            assert_eq!(pair[0].ostream(), pair[1].istream());
        }
        assert_eq!(stream.fs, 96000);
        assert_eq!(stream.channels, 3);
    }

    #[test]
    fn unknown_effect_fails_unless_guarded() {
        assert!(matches!(
            build("frobnicate 1", 48000, 2),
            Err(ChainError::UnknownEffect(_))
        ));
        let (chain, _) = build("! frobnicate gain -3", 48000, 2).unwrap();
        // the bogus token swallows "gain" as an argument? no: "gain" is a
        // registered name, so it terminates the argument scan
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn braces_must_balance() {
        assert!(matches!(build("{ gain -3", 48000, 2), Err(ChainError::MissingBrace)));
        assert!(matches!(build("} gain -3", 48000, 2), Err(ChainError::UnexpectedBrace)));
    }

    #[test]
    fn selector_rebinds_after_remix() {
        // remix doubles the channel count; :0,1 must bind to the first two
        // of the new, wider stream
        let (chain, stream) = build("remix 0 1 0 1 :0,1 gain -6", 48000, 2).unwrap();
        assert_eq!(stream.channels, 4);
        assert_eq!(chain.len(), 2);

        // remix narrows to one channel; :1 no longer exists
        assert!(build("remix 0 :1 gain -6", 48000, 2).is_err());
    }

    #[test]
    fn selector_reparse_after_channel_change() {
        // explicit selector set before a widening effect: re-parsed against
        // the grown mask, still valid
        let (_, stream) = build(":0,1 remix 0 1 0,1 gain -6", 48000, 2).unwrap();
        assert_eq!(stream.channels, 3);
    }

    #[test]
    fn file_inclusion_and_eof_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx.dsp");
        std::fs::write(&path, "gain -6 # comment\nlowpass 2k 0.5q\n").unwrap();

        let tokens = vec![format!("@{}", path.display())];
        let mut chain = EffectsChain::new();
        let mut stream = Stream::new(48000, 2);
        build_effects_chain(&tokens, &mut chain, &mut stream, Path::new("/")).unwrap();
        assert_eq!(chain.len(), 2);

        // marker enforcement
        let mut chain = EffectsChain::new();
        let mut stream = Stream::new(48000, 2);
        assert!(matches!(
            build_effects_chain_from_file(&path, &mut chain, &mut stream, None, true),
            Err(ChainError::MissingEofMarker { .. })
        ));
        std::fs::write(&path, format!("gain -6 {EFFECTS_FILE_EOF_MARKER}\n")).unwrap();
        let mut chain = EffectsChain::new();
        build_effects_chain_from_file(&path, &mut chain, &mut stream, None, true).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn zero_delay_is_elided() {
        let (chain, _) = build("delay 0", 48000, 2).unwrap();
        assert!(chain.is_empty());
    }
}

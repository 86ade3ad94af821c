//! Export plans: compiler and cursor.
//!
//! A plan is a comma-separated token list:
//!
//! | token | meaning |
//! |---|---|
//! | digits | supply an object of this type |
//! | `(` `)` | loop while the body keeps receiving objects |
//! | `[` `]` | collect the enclosed objects and transcode them as one unit |
//! | `<` | end the current logical record |
//! | `<<` | end the current physical record |
//! | `^` `v` | pen up (suppress output) / pen down |
//! | anything else | named trigger |
//!
//! ```
//! use seed_export::script::{Cue, ExportScript, ScriptCursor};
//!
//! let script = ExportScript::compile("(50,<),done").unwrap();
//! let mut cursor = ScriptCursor::new(4);
//!
//! assert_eq!(cursor.next(&script).unwrap(), Cue::Supply(50));
//! cursor.credit(); // an object was supplied, so the loop repeats
//! assert_eq!(cursor.next(&script).unwrap(), Cue::EndLogical);
//! assert_eq!(cursor.next(&script).unwrap(), Cue::Supply(50));
//! // nothing supplied this time: the loop exits
//! assert_eq!(cursor.next(&script).unwrap(), Cue::EndLogical);
//! assert_eq!(cursor.next(&script).unwrap(), Cue::Trigger("done".into()));
//! assert_eq!(cursor.next(&script).unwrap(), Cue::End);
//! ```

use std::fmt;

use crate::{ExportError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    ObjectType(u16),
    LoopStart,
    LoopEnd,
    GroupStart,
    GroupEnd,
    EndLogical,
    EndPhysical,
    PenUp,
    PenDown,
    Trigger(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectType(code) => write!(f, "{code}"),
            Self::LoopStart => write!(f, "("),
            Self::LoopEnd => write!(f, ")"),
            Self::GroupStart => write!(f, "["),
            Self::GroupEnd => write!(f, "]"),
            Self::EndLogical => write!(f, "<"),
            Self::EndPhysical => write!(f, "<<"),
            Self::PenUp => write!(f, "^"),
            Self::PenDown => write!(f, "v"),
            Self::Trigger(name) => write!(f, "{name}"),
        }
    }
}

/// Compiled, immutable plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportScript {
    tokens: Vec<Token>,
    depth: usize,
}

impl ExportScript {
    /// Parse a plan string. Loops and groups must balance, groups may not
    /// nest and may not contain loops.
    pub fn compile(plan: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        let mut max_depth = 0usize;
        let mut in_group = false;

        for text in plan.split(',').flat_map(lexemes) {
            let token = match text {
                "(" => Token::LoopStart,
                ")" => Token::LoopEnd,
                "[" => Token::GroupStart,
                "]" => Token::GroupEnd,
                "<" => Token::EndLogical,
                "<<" => Token::EndPhysical,
                "^" => Token::PenUp,
                "v" => Token::PenDown,
                t if t.bytes().all(|b| b.is_ascii_digit()) => Token::ObjectType(
                    t.parse()
                        .map_err(|_| ExportError::Script(format!("type code {t} out of range")))?,
                ),
                t => Token::Trigger(t.to_string()),
            };

            match token {
                Token::LoopStart if in_group => {
                    return Err(ExportError::Script("loop inside a group".into()));
                }
                Token::LoopStart => {
                    depth += 1;
                    max_depth = max_depth.max(depth);
                }
                Token::LoopEnd => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| ExportError::Script("unmatched ')'".into()))?;
                }
                Token::GroupStart if in_group => {
                    return Err(ExportError::Script("nested group".into()));
                }
                Token::GroupStart => in_group = true,
                Token::GroupEnd if !in_group => {
                    return Err(ExportError::Script("unmatched ']'".into()));
                }
                Token::GroupEnd => in_group = false,
                _ => {}
            }
            tokens.push(token);
        }

        if depth != 0 {
            return Err(ExportError::Script("unclosed '('".into()));
        }
        if in_group {
            return Err(ExportError::Script("unclosed '['".into()));
        }
        Ok(Self {
            tokens,
            depth: max_depth,
        })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Deepest loop nesting.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Names of all triggers, in plan order.
    pub fn triggers(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Trigger(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Split one comma-separated entry so that brackets stand alone:
/// `((53)` yields `(`, `(`, `53`, `)`.
fn lexemes(entry: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in entry.char_indices() {
        if matches!(c, '(' | ')' | '[' | ']') {
            out.push(&entry[start..i]);
            out.push(&entry[i..i + 1]);
            start = i + 1;
        }
    }
    out.push(&entry[start..]);
    out.into_iter().map(str::trim).filter(|t| !t.is_empty()).collect()
}

impl fmt::Display for ExportScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// What the cursor asks of its caller next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cue {
    Supply(u16),
    GroupStart,
    GroupEnd,
    EndLogical,
    EndPhysical,
    PenUp,
    PenDown,
    Trigger(String),
    End,
}

#[derive(Debug, Clone, Copy)]
struct LoopFrame {
    start: usize,
    score: u32,
}

/// Stateful walk over an [`ExportScript`].
///
/// Loop control is resolved here; every other token surfaces as a [`Cue`].
#[derive(Debug, Clone)]
pub struct ScriptCursor {
    position: usize,
    frames: Vec<LoopFrame>,
    limit: usize,
    /// Score outside any loop.
    top_score: u32,
}

impl ScriptCursor {
    pub fn new(limit: usize) -> Self {
        Self {
            position: 0,
            frames: Vec::with_capacity(limit),
            limit,
            top_score: 0,
        }
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.frames.clear();
        self.top_score = 0;
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Record that an object was supplied at the current depth.
    pub fn credit(&mut self) {
        match self.frames.last_mut() {
            Some(frame) => frame.score += 1,
            None => self.top_score += 1,
        }
    }

    /// Objects supplied outside any loop, plus everything propagated out of
    /// loops that repeated.
    pub fn top_score(&self) -> u32 {
        self.top_score
    }

    pub fn next(&mut self, script: &ExportScript) -> Result<Cue> {
        loop {
            let Some(token) = script.tokens.get(self.position) else {
                return Ok(Cue::End);
            };
            self.position += 1;

            let cue = match token {
                Token::LoopStart => {
                    if self.frames.len() >= self.limit {
                        return Err(ExportError::LoopDepth {
                            depth: self.frames.len() + 1,
                            limit: self.limit,
                        });
                    }
                    self.frames.push(LoopFrame {
                        start: self.position,
                        score: 0,
                    });
                    continue;
                }
                Token::LoopEnd => {
                    let Some(frame) = self.frames.last_mut() else {
                        return Err(ExportError::Script("unmatched ')'".into()));
                    };
                    if frame.score == 0 {
                        self.frames.pop();
                    } else {
                        let score = std::mem::take(&mut frame.score);
                        self.position = frame.start;
                        let depth = self.frames.len();
                        match depth.checked_sub(2).map(|i| &mut self.frames[i]) {
                            Some(parent) => parent.score += score,
                            None => self.top_score += score,
                        }
                    }
                    continue;
                }
                Token::ObjectType(code) => Cue::Supply(*code),
                Token::GroupStart => Cue::GroupStart,
                Token::GroupEnd => Cue::GroupEnd,
                Token::EndLogical => Cue::EndLogical,
                Token::EndPhysical => Cue::EndPhysical,
                Token::PenUp => Cue::PenUp,
                Token::PenDown => Cue::PenDown,
                Token::Trigger(name) => Cue::Trigger(name.clone()),
            };
            return Ok(cue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(script: &ExportScript, mut supply: impl FnMut(u16) -> bool) -> Vec<Cue> {
        let mut cursor = ScriptCursor::new(8);
        let mut cues = Vec::new();
        loop {
            let cue = cursor.next(script).unwrap();
            if let Cue::Supply(code) = cue {
                if supply(code) {
                    cursor.credit();
                }
            }
            if cue == Cue::End {
                break;
            }
            cues.push(cue);
        }
        cues
    }

    #[test]
    fn test_compile_all_token_kinds() {
        let script = ExportScript::compile("^,reset,(50,[999,1000]),<,<<,v,patch").unwrap();
        assert_eq!(
            script.tokens(),
            &[
                Token::PenUp,
                Token::Trigger("reset".into()),
                Token::LoopStart,
                Token::ObjectType(50),
                Token::GroupStart,
                Token::ObjectType(999),
                Token::ObjectType(1000),
                Token::GroupEnd,
                Token::LoopEnd,
                Token::EndLogical,
                Token::EndPhysical,
                Token::PenDown,
                Token::Trigger("patch".into()),
            ]
        );
        assert_eq!(script.depth(), 1);
        assert_eq!(script.to_string(), "^,reset,(,50,[,999,1000,],),<,<<,v,patch");
        assert_eq!(script.triggers().collect::<Vec<_>>(), vec!["reset", "patch"]);
    }

    #[test]
    fn test_brackets_attach_to_neighbours() {
        let attached = ExportScript::compile("((53),(54)),[999,1000]").unwrap();
        let spaced = ExportScript::compile("(,(,53,),(,54,),),[,999,1000,]").unwrap();
        assert_eq!(attached, spaced);
        assert_eq!(
            &attached.tokens()[..4],
            &[
                Token::LoopStart,
                Token::LoopStart,
                Token::ObjectType(53),
                Token::LoopEnd,
            ]
        );
        assert_eq!(attached.triggers().count(), 0);
        assert_eq!(attached.depth(), 2);
    }

    #[test]
    fn test_compile_rejects_unbalanced() {
        assert!(ExportScript::compile("(50").is_err());
        assert!(ExportScript::compile("50)").is_err());
        assert!(ExportScript::compile("[50").is_err());
        assert!(ExportScript::compile("50]").is_err());
        assert!(ExportScript::compile("[[50]]").is_err());
        assert!(ExportScript::compile("[(50)]").is_err());
        assert!(ExportScript::compile("99999").is_err());
    }

    #[test]
    fn test_loop_exits_when_unproductive() {
        let script = ExportScript::compile("(52)").unwrap();
        let mut remaining = 3;
        let cues = walk(&script, |_| {
            if remaining > 0 {
                remaining -= 1;
                true
            } else {
                false
            }
        });
        // three productive passes plus the one that found nothing
        assert_eq!(cues, vec![Cue::Supply(52); 4]);
    }

    #[test]
    fn test_inner_score_keeps_outer_loop_alive() {
        // station A with two channels, station B with one
        let stream = [50u16, 52, 52, 50, 52];
        let mut pos = 0;
        let script = ExportScript::compile("(50,(52),<)").unwrap();
        let cues = walk(&script, |code| {
            if stream.get(pos) == Some(&code) {
                pos += 1;
                true
            } else {
                false
            }
        });
        assert_eq!(pos, stream.len());
        let supplied: Vec<_> = cues
            .iter()
            .filter(|c| matches!(c, Cue::Supply(_)))
            .collect();
        // 50 52 52 52(miss) | 50 52 52(miss) | 50(miss) 52(miss)
        assert_eq!(supplied.len(), 9);
        assert_eq!(cues.iter().filter(|c| **c == Cue::EndLogical).count(), 3);
    }

    #[test]
    fn test_loop_depth_limit() {
        let script = ExportScript::compile("(((50)))").unwrap();
        let mut cursor = ScriptCursor::new(2);
        let err = cursor.next(&script).unwrap_err();
        assert!(matches!(err, ExportError::LoopDepth { depth: 3, limit: 2 }));
    }

    #[test]
    fn test_top_score_collects_propagated_scores() {
        let script = ExportScript::compile("10,(52)").unwrap();
        let mut cursor = ScriptCursor::new(4);
        assert_eq!(cursor.next(&script).unwrap(), Cue::Supply(10));
        cursor.credit();
        assert_eq!(cursor.next(&script).unwrap(), Cue::Supply(52));
        cursor.credit();
        assert_eq!(cursor.next(&script).unwrap(), Cue::Supply(52));
        assert_eq!(cursor.next(&script).unwrap(), Cue::End);
        assert_eq!(cursor.top_score(), 2);

        cursor.reset();
        assert_eq!(cursor.top_score(), 0);
        assert_eq!(cursor.next(&script).unwrap(), Cue::Supply(10));
    }
}

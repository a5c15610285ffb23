//! The lexer for the restricted C subset this compiler accepts.
//!
//! Tokens: integer literals, identifiers (`int`/`return` are recognised as
//! keywords by the parser, not by the lexer), and a fixed punctuation set.
//! Whitespace and `//` line comments separate tokens and carry no meaning.
//! Multi-character operators are matched before any shorter prefix of them
//! (e.g. `<=` before `<`) by trying matchers in a fixed priority order.

use derive_more::Display;
use regex::Regex;

/// A single token: its class and the slice of the input it came from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    kind: TokenKind,
    text: &'src str,
    pos: usize,
}

impl<'src> Token<'src> {
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn text(&self) -> &'src str {
        self.text
    }

    pub fn pos(&self) -> usize {
        self.pos
    }
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display(";")]
    Semi,
    #[display("<<=")]
    ShlAssign,
    #[display(">>=")]
    ShrAssign,
    #[display("+=")]
    PlusAssign,
    #[display("-=")]
    MinusAssign,
    #[display("*=")]
    StarAssign,
    #[display("/=")]
    SlashAssign,
    #[display("%=")]
    PercentAssign,
    #[display("&=")]
    AmpAssign,
    #[display("|=")]
    PipeAssign,
    #[display("^=")]
    CaretAssign,
    #[display("==")]
    EqEq,
    #[display("!=")]
    NotEq,
    #[display("<=")]
    LtEq,
    #[display(">=")]
    GtEq,
    #[display("&&")]
    AndAnd,
    #[display("||")]
    OrOr,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Shr,
    #[display("=")]
    Assign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("&")]
    Amp,
    #[display("|")]
    Pipe,
    #[display("^")]
    Caret,
    #[display("!")]
    Bang,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
}

pub struct LexError(usize, char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;
        // Longer operators first so a prefix (e.g. `<`) never shadows the
        // longer operator (e.g. `<=`, `<<=`) that starts with it.
        let matchers = vec![
            (r"\A[0-9]+", Num),
            (r"\A[A-Za-z_][A-Za-z0-9_]*", Id),
            (r"\A\(", LParen),
            (r"\A\)", RParen),
            (r"\A\{", LBrace),
            (r"\A\}", RBrace),
            (r"\A;", Semi),
            (r"\A<<=", ShlAssign),
            (r"\A>>=", ShrAssign),
            (r"\A\+=", PlusAssign),
            (r"\A-=", MinusAssign),
            (r"\A\*=", StarAssign),
            (r"\A/=", SlashAssign),
            (r"\A%=", PercentAssign),
            (r"\A&=", AmpAssign),
            (r"\A\|=", PipeAssign),
            (r"\A\^=", CaretAssign),
            (r"\A==", EqEq),
            (r"\A!=", NotEq),
            (r"\A<=", LtEq),
            (r"\A>=", GtEq),
            (r"\A&&", AndAnd),
            (r"\A\|\|", OrOr),
            (r"\A<<", Shl),
            (r"\A>>", Shr),
            (r"\A=", Assign),
            (r"\A\+", Plus),
            (r"\A-", Minus),
            (r"\A\*", Star),
            (r"\A/", Slash),
            (r"\A%", Percent),
            (r"\A&", Amp),
            (r"\A\|", Pipe),
            (r"\A\^", Caret),
            (r"\A!", Bang),
            (r"\A<", Lt),
            (r"\A>", Gt),
        ]
        .into_iter()
        .map(|(pat, kind)| (Regex::new(pat).unwrap(), kind))
        .collect();

        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://[^\n]*))*").unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input (`Ok(None)`) and a
    /// lexer error (an unrecognised character).
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = m.as_str();
                let token = Token {
                    kind: *kind,
                    text: &self.input[self.pos..self.pos + text.len()],
                    pos: self.pos,
                };
                self.pos += text.len();
                return Ok(Some(token));
            }
        }
        let bad = rest.chars().next().unwrap();
        Err(LexError(self.pos, bad))
    }
}

/// Collect every token in `input`, stopping at the first error.
pub fn lex_all(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next()? {
        tokens.push(tok);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex_all(input).unwrap().iter().map(|t| t.kind()).collect()
    }

    #[test]
    fn lexes_a_minimal_function() {
        assert_eq!(
            kinds("int main(){ return 2+3*4; }"),
            vec![Id, Id, LParen, RParen, LBrace, Id, Num, Plus, Num, Star, Num, Semi, RBrace]
        );
    }

    #[test]
    fn long_operators_win_over_their_prefixes() {
        assert_eq!(kinds("<="), vec![LtEq]);
        assert_eq!(kinds("<<="), vec![ShlAssign]);
        assert_eq!(kinds("<<"), vec![Shl]);
        assert_eq!(kinds("<"), vec![Lt]);
    }

    #[test]
    fn line_comments_are_skipped() {
        assert_eq!(kinds("1 // trailing comment\n+ 2"), vec![Num, Plus, Num]);
    }

    #[test]
    fn unexpected_character_is_a_lex_error() {
        assert!(lex_all("int x = 1 @ 2;").is_err());
    }
}

// diag.rs — Diagnostics shared by every query
//
// Provides the diagnostic record shared by every query: severity, a
// (file, byte range) span, a message, a kind, and a stable code. Queries
// produce diagnostics with spans relative to their item; `rebase` shifts
// them into file coordinates when results are assembled per file.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

use crate::ast::Span;
use crate::id::FileId;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// Stable code printed with every diagnostic, e.g. `E0200`. One code per
/// `DiagKind`, listed in `codes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    pub const SYNTAX_ERROR: DiagCode = DiagCode("E0001");
    pub const UNRESOLVED_NAME: DiagCode = DiagCode("E0100");
    pub const DUPLICATE_DEFINITION: DiagCode = DiagCode("E0101");
    pub const TYPE_MISMATCH: DiagCode = DiagCode("E0200");
    pub const UNINITIALIZED_USE: DiagCode = DiagCode("E0300");
    pub const CYCLE_DETECTED: DiagCode = DiagCode("E0400");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Kind ─────────────────────────────────────────────────────────────────

/// What class of problem a diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagKind {
    SyntaxError,
    UnresolvedName,
    DuplicateDefinition,
    TypeMismatch,
    UninitializedUse,
    CycleDetected,
}

impl DiagKind {
    /// The stable code every diagnostic of this kind carries.
    pub fn code(self) -> DiagCode {
        match self {
            DiagKind::SyntaxError => codes::SYNTAX_ERROR,
            DiagKind::UnresolvedName => codes::UNRESOLVED_NAME,
            DiagKind::DuplicateDefinition => codes::DUPLICATE_DEFINITION,
            DiagKind::TypeMismatch => codes::TYPE_MISMATCH,
            DiagKind::UninitializedUse => codes::UNINITIALIZED_USE,
            DiagKind::CycleDetected => codes::CYCLE_DETECTED,
        }
    }
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub code: DiagCode,
    pub level: DiagLevel,
    pub file: FileId,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create an error diagnostic of `kind`, carrying the kind's code.
    pub fn error(kind: DiagKind, file: FileId, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            level: DiagLevel::Error,
            file,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// Shift every span by `offset` bytes (item-relative to file-absolute).
    pub fn rebase(mut self, offset: usize) -> Self {
        self.span = shift(self.span, offset);
        for related in &mut self.related_spans {
            related.span = shift(related.span, offset);
        }
        self
    }

    /// Canonical ordering used when diagnostics are reported per file.
    pub fn sort_key(&self) -> (usize, usize, DiagCode) {
        (self.span.start, self.span.end, self.code)
    }
}

/// Shift a span by `offset` bytes.
pub fn shift(span: Span, offset: usize) -> Span {
    let shifted: SimpleSpan = (span.start + offset..span.end + offset).into();
    shifted
}

/// Sort diagnostics into their canonical per-file order.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        write!(f, "{}[{}]: {}", level, self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> Span {
        (start..end).into()
    }

    #[test]
    fn display_carries_kind_code() {
        let d = Diagnostic::error(
            DiagKind::TypeMismatch,
            FileId(0),
            span(0, 1),
            "mismatched types",
        );
        assert_eq!(format!("{d}"), "error[E0200]: mismatched types");
    }

    #[test]
    fn display_warning_with_hint() {
        let d = Diagnostic {
            level: DiagLevel::Warning,
            ..Diagnostic::error(
                DiagKind::UninitializedUse,
                FileId(0),
                span(0, 1),
                "use of possibly-uninitialized `x`",
            )
        }
        .with_hint("assign `x` on every path");
        assert_eq!(
            format!("{d}"),
            "warning[E0300]: use of possibly-uninitialized `x`\n  hint: assign `x` on every path"
        );
    }

    #[test]
    fn rebase_shifts_primary_and_related_spans() {
        let d = Diagnostic::error(DiagKind::UnresolvedName, FileId(1), span(2, 4), "x")
            .with_related(span(0, 1), "here")
            .rebase(10);
        assert_eq!(d.span, span(12, 14));
        assert_eq!(d.related_spans[0].span, span(10, 11));
    }

    #[test]
    fn sort_orders_by_position_then_code() {
        let mut diags = vec![
            Diagnostic::error(DiagKind::UninitializedUse, FileId(0), span(5, 6), "b"),
            Diagnostic::error(DiagKind::TypeMismatch, FileId(0), span(5, 6), "a"),
            Diagnostic::error(DiagKind::SyntaxError, FileId(0), span(0, 1), "c"),
        ];
        sort_diagnostics(&mut diags);
        let kinds: Vec<_> = diags.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiagKind::SyntaxError,
                DiagKind::TypeMismatch,
                DiagKind::UninitializedUse
            ]
        );
    }
}

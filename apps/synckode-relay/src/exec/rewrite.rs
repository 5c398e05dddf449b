//! Best-effort TypeScript to JavaScript rewriting.
//!
//! These are textual regex passes, not a compiler. They drop primitive type
//! annotations, simple generic arguments, `interface`/`type` blocks and
//! `export` keywords so that plain `node` can run small snippets. Anything
//! beyond that (unions, object types, enums, decorators, `as` casts) passes
//! through untouched and will fail at runtime; a primitive-looking `: null`
//! inside a ternary is stripped too. Users see the interpreter's error.

use once_cell::sync::Lazy;
use regex::Regex;

static PRIMITIVE_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r":\s*(?:string|number|boolean|any|void|never|unknown|object|null|undefined)(?:\[\])?\s*([,)=;{<\n])",
    )
    .expect("primitive annotation pattern")
});

static PRIMITIVE_ANNOTATION_JSX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r":\s*(?:string|number|boolean|any|void|never|unknown|object)(?:\[\])?\s*([,)=;{<\n])")
        .expect("jsx primitive annotation pattern")
});

static GENERIC_ARGUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[A-Z][A-Za-z0-9]*>").expect("generic argument pattern"));

static TYPE_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:export\s+)?(?:interface|type)\s+\w[\s\S]*?\n\}")
        .expect("type declaration pattern")
});

static EXPORT_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^export\s+").expect("export keyword pattern"));

/// Lossy strip for `.ts` sources.
pub fn strip_typescript(source: &str) -> String {
    let text = PRIMITIVE_ANNOTATION.replace_all(source, "$1");
    let text = GENERIC_ARGUMENT.replace_all(&text, "");
    let text = TYPE_DECLARATION.replace_all(&text, "");
    EXPORT_KEYWORD.replace_all(&text, "").into_owned()
}

/// Lighter strip for `.tsx` sources; keeps declarations so JSX-heavy files
/// are not mangled further.
pub fn strip_tsx(source: &str) -> String {
    let text = PRIMITIVE_ANNOTATION_JSX.replace_all(source, "$1");
    let text = GENERIC_ARGUMENT.replace_all(&text, "");
    EXPORT_KEYWORD.replace_all(&text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn strips_primitive_annotations() {
        // Whitespace before the terminator goes with the annotation.
        let source = "function add(a: number, b: number): number {\n  return a + b;\n}\nconst names: string[] = [];\n";
        let stripped = strip_typescript(source);
        assert_eq!(
            stripped,
            "function add(a, b){\n  return a + b;\n}\nconst names= [];\n"
        );
    }

    #[test_timeout::timeout]
    fn removes_interfaces_and_exports() {
        let source = "export interface Point {\n  x: number;\n  y: number;\n}\nexport function origin() {\n  return { x: 0, y: 0 };\n}\n";
        let stripped = strip_typescript(source);
        assert_eq!(stripped, "\nfunction origin() {\n  return { x: 0, y: 0 };\n}\n");
    }

    #[test_timeout::timeout]
    fn removes_simple_generic_arguments() {
        let stripped = strip_typescript("const m = new Map<Key>();\n");
        assert_eq!(stripped, "const m = new Map();\n");
    }

    #[test_timeout::timeout]
    fn leaves_complex_types_alone() {
        // Known gap: unions are not understood.
        let source = "let id: string | number = 1;\n";
        assert_eq!(strip_typescript(source), source);
    }

    #[test_timeout::timeout]
    fn tsx_variant_keeps_null_annotations() {
        let stripped = strip_tsx("let a: null = null;\nexport const b: string = \"x\";\n");
        assert_eq!(stripped, "let a: null = null;\nconst b= \"x\";\n");
    }
}

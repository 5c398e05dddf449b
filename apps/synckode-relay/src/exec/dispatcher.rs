use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::rewrite;
use super::CommandLine;

/// How the on-disk file stem is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryName {
    /// Always [`DEFAULT_STEM`].
    Fixed,
    /// Name of the first `public class`, [`DEFAULT_CLASS`] when absent.
    PublicClass,
}

pub const DEFAULT_STEM: &str = "main";
pub const DEFAULT_CLASS: &str = "Main";
pub const FALLBACK_LANGUAGE: &str = "javascript";

/// Static description of how to run source text in one language.
pub struct InvocationRecipe {
    pub language: &'static str,
    pub aliases: &'static [&'static str],
    pub extension: &'static str,
    pub rewrite: Option<fn(&str) -> String>,
    pub entry: EntryName,
    pub launch: fn(&Path) -> CommandLine,
}

impl std::fmt::Debug for InvocationRecipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationRecipe")
            .field("language", &self.language)
            .field("extension", &self.extension)
            .field("rewrite", &self.rewrite.is_some())
            .field("entry", &self.entry)
            .finish()
    }
}

pub static RECIPES: &[InvocationRecipe] = &[
    recipe("javascript", &["js", "jsx"], "js", None, node),
    // Rewritten output is plain ES module syntax.
    recipe("typescript", &["ts"], "mjs", Some(rewrite::strip_typescript), node),
    recipe("tsx", &[], "js", Some(rewrite::strip_tsx), node),
    recipe("python", &["python3", "py"], "py", None, python),
    recipe("go", &["golang"], "go", None, go_run),
    InvocationRecipe {
        language: "java",
        aliases: &[],
        extension: "java",
        rewrite: None,
        entry: EntryName::PublicClass,
        launch: java,
    },
    recipe("c", &[], "c", None, gcc),
    recipe("c++", &["cpp"], "cpp", None, gxx),
    recipe("rust", &["rs"], "rs", None, rustc),
    recipe("php", &[], "php", None, php),
    recipe("ruby", &["rb"], "rb", None, ruby),
    recipe("bash", &["shell", "sh"], "sh", None, bash),
    recipe("powershell", &["ps1"], "ps1", None, powershell),
    recipe("lua", &[], "lua", None, lua),
    recipe("r", &[], "r", None, rscript),
    recipe("kotlin", &["kts"], "kts", None, kotlin),
    recipe("swift", &[], "swift", None, swift),
    recipe("perl", &["pl"], "pl", None, perl),
];

const fn recipe(
    language: &'static str,
    aliases: &'static [&'static str],
    extension: &'static str,
    rewrite: Option<fn(&str) -> String>,
    launch: fn(&Path) -> CommandLine,
) -> InvocationRecipe {
    InvocationRecipe {
        language,
        aliases,
        extension,
        rewrite,
        entry: EntryName::Fixed,
        launch,
    }
}

static PUBLIC_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"public\s+class\s+(\w+)").expect("public class pattern"));

/// Language label to recipe lookup, built once at startup.
#[derive(Debug)]
pub struct Dispatcher {
    by_key: HashMap<&'static str, &'static InvocationRecipe>,
    fallback: &'static InvocationRecipe,
}

/// Source text ready to be written into a run directory.
#[derive(Debug)]
pub struct PreparedSource {
    pub recipe: &'static InvocationRecipe,
    pub file_name: String,
    pub text: String,
}

impl PreparedSource {
    /// Path of the source file inside `dir` and the command that runs it.
    pub fn command_in(&self, dir: &Path) -> (PathBuf, CommandLine) {
        let path = dir.join(&self.file_name);
        let command = (self.recipe.launch)(&path);
        (path, command)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut by_key = HashMap::new();
        for recipe in RECIPES {
            by_key.insert(recipe.language, recipe);
            for alias in recipe.aliases {
                by_key.insert(*alias, recipe);
            }
        }
        let fallback = RECIPES
            .iter()
            .find(|recipe| recipe.language == FALLBACK_LANGUAGE)
            .unwrap_or(&RECIPES[0]);
        Self { by_key, fallback }
    }

    /// Lowercase and drop everything except ASCII letters, digits and `+`.
    pub fn normalize(label: &str) -> String {
        label
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '+')
            .collect()
    }

    /// Unknown or missing labels fall back to JavaScript.
    pub fn resolve(&self, label: Option<&str>) -> &'static InvocationRecipe {
        let key = label.map(Self::normalize).unwrap_or_default();
        self.by_key.get(key.as_str()).copied().unwrap_or(self.fallback)
    }

    pub fn prepare(&self, language: Option<&str>, source: &str) -> PreparedSource {
        let recipe = self.resolve(language);
        let text = match recipe.rewrite {
            Some(rewrite) => rewrite(source),
            None => source.to_string(),
        };
        let stem = match recipe.entry {
            EntryName::Fixed => DEFAULT_STEM.to_string(),
            EntryName::PublicClass => PUBLIC_CLASS
                .captures(&text)
                .and_then(|captures| captures.get(1))
                .map(|name| name.as_str().to_string())
                .unwrap_or_else(|| DEFAULT_CLASS.to_string()),
        };
        PreparedSource {
            recipe,
            file_name: format!("{stem}.{}", recipe.extension),
            text,
        }
    }
}

/// Quote for POSIX `sh`.
pub fn shell_quote(raw: &str) -> String {
    if raw.is_empty() {
        return "''".to_string();
    }
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('\'');
    for ch in raw.chars() {
        if ch == '\'' {
            quoted.push_str("'\"'\"'");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn node(file: &Path) -> CommandLine {
    CommandLine::new("node", [arg(file)])
}

fn python(file: &Path) -> CommandLine {
    let program = if cfg!(windows) { "python" } else { "python3" };
    CommandLine::new(program, [arg(file)])
}

fn go_run(file: &Path) -> CommandLine {
    CommandLine::new("go", ["run".to_string(), arg(file)])
}

fn java(file: &Path) -> CommandLine {
    let dir = file.parent().map(arg).unwrap_or_else(|| ".".to_string());
    let class = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_CLASS.to_string());
    let script = format!(
        "cd {dir} && javac {file} && java -cp {dir} {class}",
        dir = shell_quote(&dir),
        file = shell_quote(&arg(file)),
        class = shell_quote(&class),
    );
    CommandLine::new("bash", ["-c".to_string(), script])
}

fn compile_and_run(compiler: &str, file: &Path) -> CommandLine {
    let binary = arg(&file.with_extension(""));
    let script = format!(
        "{compiler} {file} -o {binary} && {binary}",
        file = shell_quote(&arg(file)),
        binary = shell_quote(&binary),
    );
    CommandLine::new("bash", ["-c".to_string(), script])
}

fn gcc(file: &Path) -> CommandLine {
    compile_and_run("gcc", file)
}

fn gxx(file: &Path) -> CommandLine {
    compile_and_run("g++", file)
}

fn rustc(file: &Path) -> CommandLine {
    compile_and_run("rustc", file)
}

fn php(file: &Path) -> CommandLine {
    CommandLine::new("php", [arg(file)])
}

fn ruby(file: &Path) -> CommandLine {
    CommandLine::new("ruby", [arg(file)])
}

fn bash(file: &Path) -> CommandLine {
    CommandLine::new("bash", [arg(file)])
}

fn powershell(file: &Path) -> CommandLine {
    CommandLine::new(
        "powershell",
        ["-ExecutionPolicy".to_string(), "Bypass".to_string(), "-File".to_string(), arg(file)],
    )
}

fn lua(file: &Path) -> CommandLine {
    CommandLine::new("lua", [arg(file)])
}

fn rscript(file: &Path) -> CommandLine {
    CommandLine::new("Rscript", [arg(file)])
}

fn kotlin(file: &Path) -> CommandLine {
    CommandLine::new("kotlinc", ["-script".to_string(), arg(file)])
}

fn swift(file: &Path) -> CommandLine {
    CommandLine::new("swift", [arg(file)])
}

fn perl(file: &Path) -> CommandLine {
    CommandLine::new("perl", [arg(file)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn normalizes_labels() {
        assert_eq!(Dispatcher::normalize("  Python 3 "), "python3");
        assert_eq!(Dispatcher::normalize("C++"), "c++");
        assert_eq!(Dispatcher::normalize("Type-Script"), "typescript");
    }

    #[test_timeout::timeout]
    fn resolves_aliases_and_falls_back_to_javascript() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.resolve(Some("Python3")).language, "python");
        assert_eq!(dispatcher.resolve(Some("cpp")).language, "c++");
        assert_eq!(dispatcher.resolve(Some("C")).language, "c");
        assert_eq!(dispatcher.resolve(Some("brainfuck")).language, "javascript");
        assert_eq!(dispatcher.resolve(Some("")).language, "javascript");
        assert_eq!(dispatcher.resolve(None).language, "javascript");
    }

    #[test_timeout::timeout]
    fn every_label_is_unique() {
        let mut seen = std::collections::HashSet::new();
        for recipe in RECIPES {
            assert!(seen.insert(recipe.language), "duplicate {}", recipe.language);
            for alias in recipe.aliases {
                assert!(seen.insert(*alias), "duplicate alias {alias}");
            }
        }
    }

    #[test_timeout::timeout]
    fn java_uses_the_public_class_name() {
        let dispatcher = Dispatcher::new();
        let prepared = dispatcher.prepare(
            Some("Java"),
            "public class HelloWorld {\n  public static void main(String[] a) {}\n}\n",
        );
        assert_eq!(prepared.file_name, "HelloWorld.java");

        let prepared = dispatcher.prepare(Some("java"), "class Hidden {}\n");
        assert_eq!(prepared.file_name, "Main.java");

        let (path, command) = prepared.command_in(Path::new("/tmp/run"));
        assert_eq!(path, Path::new("/tmp/run/Main.java"));
        assert_eq!(command.program, "bash");
        assert_eq!(
            command.args[1],
            "cd '/tmp/run' && javac '/tmp/run/Main.java' && java -cp '/tmp/run' 'Main'"
        );
    }

    #[test_timeout::timeout]
    fn typescript_is_rewritten_before_writing() {
        let dispatcher = Dispatcher::new();
        let prepared = dispatcher.prepare(Some("typescript"), "const n: number = 1;\n");
        assert_eq!(prepared.file_name, "main.mjs");
        assert_eq!(prepared.text, "const n= 1;\n");
    }

    #[test_timeout::timeout]
    fn compiled_languages_build_next_to_the_source() {
        let dispatcher = Dispatcher::new();
        let prepared = dispatcher.prepare(Some("c"), "int main(void) { return 0; }\n");
        let (_, command) = prepared.command_in(Path::new("/tmp/run"));
        assert_eq!(
            command.args,
            vec![
                "-c".to_string(),
                "gcc '/tmp/run/main.c' -o '/tmp/run/main' && '/tmp/run/main'".to_string()
            ]
        );
    }

    #[test_timeout::timeout]
    fn interpreters_take_the_file_path() {
        let dispatcher = Dispatcher::new();
        let prepared = dispatcher.prepare(Some("python"), "print('hi')\n");
        let (path, command) = prepared.command_in(Path::new("/tmp/run"));
        assert_eq!(path, Path::new("/tmp/run/main.py"));
        assert_eq!(command.args, vec!["/tmp/run/main.py".to_string()]);
    }

    #[test_timeout::timeout]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("simple"), "'simple'");
        assert_eq!(shell_quote("with space"), "'with space'");
        assert_eq!(shell_quote("path'with"), "'path'\"'\"'with'");
        assert_eq!(shell_quote(""), "''");
    }
}

//! The `File` library.
//!
//! Paths are taken as given, relative to the process working directory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use walkdir::WalkDir;

use crate::diagnostics::codes;
use crate::value::Value;

use super::{expect_args, string_arg, Library, LibraryError, LibraryResult};

/// The file library.
#[derive(Default)]
pub struct FileLibrary;

impl FileLibrary {
    pub fn new() -> Self {
        Self
    }

    fn read(&self, path: &str) -> LibraryResult<Value> {
        fs::read_to_string(path)
            .map(Value::from)
            .map_err(|e| io_error("read", path, e))
    }

    fn write(&self, path: &str, content: &str) -> LibraryResult<Value> {
        fs::write(path, content)
            .map(|_| Value::Boolean(true))
            .map_err(|e| io_error("write", path, e))
    }

    fn append(&self, path: &str, content: &str) -> LibraryResult<Value> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(content.as_bytes()))
            .map(|_| Value::Boolean(true))
            .map_err(|e| io_error("append to", path, e))
    }

    fn delete(&self, path: &str) -> LibraryResult<Value> {
        fs::remove_file(path)
            .map(|_| Value::Boolean(true))
            .map_err(|e| io_error("delete", path, e))
    }

    /// Entry names directly inside `dir`, sorted.
    fn list(&self, dir: &str) -> LibraryResult<Value> {
        if !Path::new(dir).is_dir() {
            return Err(LibraryError::new(
                codes::IO_FAILURE,
                format!("cannot list '{}': not a directory", dir),
            ));
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                LibraryError::new(codes::IO_FAILURE, format!("cannot list '{}': {}", dir, e))
            })?;
            names.push(Value::from(entry.file_name().to_string_lossy().into_owned()));
        }
        Ok(Value::array(names))
    }
}

fn io_error(action: &str, path: &str, error: std::io::Error) -> LibraryError {
    LibraryError::new(
        codes::IO_FAILURE,
        format!("cannot {} '{}': {}", action, path, error),
    )
}

const FUNCTIONS: &[&str] = &["read", "write", "append", "exists", "delete", "list"];

impl Library for FileLibrary {
    fn name(&self) -> &'static str {
        "File"
    }

    fn functions(&self) -> &'static [&'static str] {
        FUNCTIONS
    }

    fn call(&mut self, function: &str, args: Vec<Value>) -> LibraryResult<Value> {
        match function {
            "read" => {
                expect_args(function, &args, 1, 1)?;
                self.read(string_arg(function, &args, 0)?)
            }
            "write" | "append" => {
                expect_args(function, &args, 2, 2)?;
                let path = string_arg(function, &args, 0)?;
                let content = args[1].to_string();
                if function == "write" {
                    self.write(path, &content)
                } else {
                    self.append(path, &content)
                }
            }
            "exists" => {
                expect_args(function, &args, 1, 1)?;
                let path = string_arg(function, &args, 0)?;
                Ok(Value::Boolean(Path::new(path).exists()))
            }
            "delete" => {
                expect_args(function, &args, 1, 1)?;
                self.delete(string_arg(function, &args, 0)?)
            }
            "list" => {
                expect_args(function, &args, 0, 1)?;
                if args.is_empty() {
                    self.list(".")
                } else {
                    self.list(string_arg(function, &args, 0)?)
                }
            }
            _ => Err(LibraryError::new(
                codes::UNKNOWN_PROPERTY,
                format!("File has no function '{}'", function),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn path_arg(path: &Path) -> Value {
        Value::from(path.to_string_lossy().into_owned())
    }

    #[test]
    fn test_write_append_read_delete() {
        let dir = tempdir().unwrap();
        let file = path_arg(&dir.path().join("notes.txt"));
        let mut lib = FileLibrary::new();

        assert_eq!(lib.call("exists", vec![file.clone()]).unwrap(), Value::Boolean(false));
        lib.call("write", vec![file.clone(), "one".into()]).unwrap();
        lib.call("append", vec![file.clone(), Value::Number(2.0)]).unwrap();
        assert_eq!(lib.call("read", vec![file.clone()]).unwrap(), Value::from("one2"));
        assert_eq!(lib.call("delete", vec![file.clone()]).unwrap(), Value::Boolean(true));
        assert_eq!(lib.call("exists", vec![file.clone()]).unwrap(), Value::Boolean(false));

        let err = lib.call("read", vec![file]).unwrap_err();
        assert_eq!(err.code, codes::IO_FAILURE);
    }

    #[test]
    fn test_list_is_shallow_and_sorted() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.lapis"), "").unwrap();
        fs::write(dir.path().join("a.lapis"), "").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("deep.lapis"), "").unwrap();

        let mut lib = FileLibrary::new();
        let listed = lib.call("list", vec![path_arg(dir.path())]).unwrap();
        assert_eq!(listed.to_string(), "[a.lapis, b.lapis, sub]");
    }

    #[test]
    fn test_path_must_be_a_string() {
        let mut lib = FileLibrary::new();
        let err = lib.call("read", vec![Value::Number(1.0)]).unwrap_err();
        assert_eq!(err.code, codes::BINARY_TYPE_MISMATCH);
    }
}

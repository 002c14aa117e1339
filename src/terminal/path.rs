//! Translation between native Windows paths and MSYS2 POSIX paths.
//!
//! `C:\a\b` maps to `/c/a/b` and back. The two functions are inverse on
//! canonical native paths: upper-case drive letter, backslash separators,
//! no empty components and no trailing separator except the drive root.
//! Relative paths only swap separators.
//!
//! Rejected: UNC shares (`\\server\share`), drive-relative paths (`C:foo`),
//! rooted paths without a drive (`\foo`), empty paths, and drive letters
//! outside `A-Z`.

use crate::core::errors::Error;

fn translation_error(path: &str, reason: impl Into<String>) -> Error {
    Error::PathTranslation {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn is_separator(c: char) -> bool {
    c == '\\' || c == '/'
}

/// Convert a native path (`E:\proj\build`) to its POSIX form (`/e/proj/build`).
pub fn native_to_posix(native: &str) -> Result<String, Error> {
    if native.is_empty() {
        return Err(translation_error(native, "path is empty"));
    }

    let mut chars = native.chars();
    let first = chars.next().unwrap_or_default();
    let second = chars.next();

    if is_separator(first) && second.is_some_and(is_separator) {
        return Err(translation_error(native, "UNC paths are not supported"));
    }

    if second == Some(':') {
        if !first.is_ascii_alphabetic() {
            return Err(translation_error(
                native,
                format!("`{}` is not a valid drive letter", first),
            ));
        }

        let rest = &native[first.len_utf8() + 1..];
        if !rest.starts_with(is_separator) {
            return Err(translation_error(
                native,
                "drive-relative paths are not supported",
            ));
        }

        let mut posix = format!("/{}", first.to_ascii_lowercase());
        for component in rest.split(is_separator).filter(|c| !c.is_empty()) {
            posix.push('/');
            posix.push_str(component);
        }
        return Ok(posix);
    }

    if is_separator(first) {
        return Err(translation_error(native, "rooted path has no drive letter"));
    }

    Ok(native.replace('\\', "/"))
}

/// Convert a POSIX path (`/e/proj/build`) back to native form (`E:\proj\build`).
pub fn posix_to_native(posix: &str) -> Result<String, Error> {
    if posix.is_empty() {
        return Err(translation_error(posix, "path is empty"));
    }

    if posix.starts_with("//") {
        return Err(translation_error(posix, "UNC paths are not supported"));
    }

    let Some(rooted) = posix.strip_prefix('/') else {
        return Ok(posix.replace('/', "\\"));
    };

    let mut components = rooted.split('/').filter(|c| !c.is_empty());
    let drive = components
        .next()
        .ok_or_else(|| translation_error(posix, "the POSIX root has no native equivalent"))?;

    let mut letters = drive.chars();
    let letter = match (letters.next(), letters.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
        _ => {
            return Err(translation_error(
                posix,
                "path is not under a drive mount (/c, /d, ...)",
            ))
        }
    };

    let rest: Vec<&str> = components.collect();
    Ok(format!("{}:\\{}", letter, rest.join("\\")))
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

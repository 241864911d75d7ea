// Legacy textual path joining for `Reference::child`.

/// Join `parent` and `child` with `/`, then collapse doubled separators in
/// a single pass.
///
/// Purely textual: leading or trailing slashes on either side can still
/// leave a `//` behind (`"a/"` + `"/b"` gives `"a//b"`), and an empty parent
/// yields a leading slash. Paths are not validated.
pub(crate) fn join_path(parent: &str, child: &str) -> String {
    // Collapses `//` to `/` rather than deleting it: "a/" + "b" stays "a/b".
    format!("{parent}/{child}").replace("//", "/")
}

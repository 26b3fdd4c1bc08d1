use std::{
    fmt::Display,
    path::Path,
};

pub use directories::ProjectDirs;
use directories::UserDirs;

/// Displays a path with the home directory abbreviated to `~`.
pub fn format_path<P>(path: P) -> FormatPath<P>
where
    P: AsRef<Path>,
{
    FormatPath { path }
}

#[derive(Clone, Copy, Debug)]
pub struct FormatPath<P> {
    pub path: P,
}

impl<P> Display for FormatPath<P>
where
    P: AsRef<Path>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = self.path.as_ref();
        let home = UserDirs::new().map(|user_dirs| user_dirs.home_dir().to_owned());

        match home
            .as_deref()
            .and_then(|home| path.strip_prefix(home).ok())
        {
            Some(relative) => write!(f, "~/{}", relative.display()),
            None => write!(f, "{}", path.display()),
        }
    }
}

/// Per-user directories (config, data, cache) of the application `name`.
///
/// `None` if the platform has no home directory.
pub fn project_dirs(name: &str) -> Option<ProjectDirs> {
    ProjectDirs::from("", "", name)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::path::format_path;

    #[test]
    fn it_keeps_paths_outside_of_home() {
        assert_eq!(
            format_path(Path::new("relative/run.json")).to_string(),
            "relative/run.json"
        );
    }
}

//! Manifest discovery over archive entry names.

use crate::report::{Event, Reporter};
use crate::{Error, Result};

/// Suffix of plugin manifests, always selected.
pub const PLUGIN_MANIFEST_SUFFIX: &str = ".appex/Info.plist";

/// Suffix of main-bundle manifests, selected unless only plugins are wanted.
pub const APP_MANIFEST_SUFFIX: &str = ".app/Info.plist";

/// Path fragments marking watch companion apps.
const WATCH_MARKERS: [&str; 3] = [
    ".app/Watch",
    ".app/WatchKit",
    ".app/com.apple.WatchPlaceholder",
];

/// Selects the manifests to patch, in archive order.
///
/// Entries belonging to a watch companion are never selected; each
/// companion directory is reported once.
pub fn find_manifests<'a, I>(names: I, plugins_only: bool, reporter: &dyn Reporter) -> Result<Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut manifests = Vec::new();
    let mut watch_dirs: Vec<&str> = Vec::new();

    for name in names {
        if let Some(dir) = watch_dir(name) {
            if !watch_dirs.contains(&dir) {
                reporter.report(Event::Notice(format!(
                    "found watch app at '{}', you might want to remove that",
                    dir
                )));
                watch_dirs.push(dir);
            }
            continue;
        }

        if name.ends_with(PLUGIN_MANIFEST_SUFFIX)
            || (!plugins_only && name.ends_with(APP_MANIFEST_SUFFIX))
        {
            manifests.push(name.to_string());
        }
    }

    if manifests.is_empty() {
        return Err(if plugins_only {
            Error::NoPlugins
        } else {
            Error::NoPlist
        });
    }
    Ok(manifests)
}

/// The watch companion directory `name` lives in, if any.
fn watch_dir(name: &str) -> Option<&str> {
    let start = WATCH_MARKERS
        .iter()
        .filter_map(|marker| name.find(marker))
        .min()?
        + ".app/".len();
    let end = name[start..]
        .find('/')
        .map_or(name.len(), |offset| start + offset);
    Some(&name[..end])
}

/// Entry name of the executable next to `manifest`.
pub fn executable_path(manifest: &str, executable_name: &str) -> String {
    match manifest.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, executable_name),
        None => executable_name.to_string(),
    }
}

/// The outermost `.app` directory containing `entry`, e.g. `Payload/App.app`.
pub fn top_level_bundle(entry: &str) -> Option<&str> {
    entry.find(".app/").map(|i| &entry[..i + ".app".len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;

    const ENTRIES: &[&str] = &[
        "Payload/",
        "Payload/App.app/",
        "Payload/App.app/Info.plist",
        "Payload/App.app/App",
        "Payload/App.app/PlugIns/Ext.appex/Info.plist",
        "Payload/App.app/PlugIns/Ext.appex/Ext",
        "Payload/App.app/Frameworks/Kit.framework/Info.plist",
    ];

    #[test]
    fn test_finds_app_and_plugins() {
        let reporter = MemoryReporter::new();
        let found = find_manifests(ENTRIES.iter().copied(), false, &reporter).unwrap();
        assert_eq!(
            found,
            vec![
                "Payload/App.app/Info.plist",
                "Payload/App.app/PlugIns/Ext.appex/Info.plist",
            ]
        );
        assert!(reporter.events().is_empty());
    }

    #[test]
    fn test_plugins_only() {
        let found = find_manifests(ENTRIES.iter().copied(), true, &MemoryReporter::new()).unwrap();
        assert_eq!(found, vec!["Payload/App.app/PlugIns/Ext.appex/Info.plist"]);
    }

    #[test]
    fn test_no_manifests() {
        let names = ["Payload/", "Payload/readme.txt"];
        let reporter = MemoryReporter::new();
        assert!(matches!(
            find_manifests(names.iter().copied(), false, &reporter),
            Err(Error::NoPlist)
        ));

        let names = ["Payload/App.app/Info.plist"];
        assert!(matches!(
            find_manifests(names.iter().copied(), true, &reporter),
            Err(Error::NoPlugins)
        ));
    }

    #[test]
    fn test_watch_apps_excluded_and_reported_once() {
        let names = [
            "Payload/App.app/Info.plist",
            "Payload/App.app/Watch/W.app/Info.plist",
            "Payload/App.app/Watch/W.app/PlugIns/WE.appex/Info.plist",
            "Payload/App.app/com.apple.WatchPlaceholder/P.app/Info.plist",
        ];
        let reporter = MemoryReporter::new();
        let found = find_manifests(names.iter().copied(), false, &reporter).unwrap();
        assert_eq!(found, vec!["Payload/App.app/Info.plist"]);

        let notices: Vec<_> = reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Notice(message) => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(notices.len(), 2);
        assert!(notices[0].contains("'Payload/App.app/Watch'"));
        assert!(notices[1].contains("'Payload/App.app/com.apple.WatchPlaceholder'"));
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            executable_path("Payload/App.app/PlugIns/Ext.appex/Info.plist", "Ext"),
            "Payload/App.app/PlugIns/Ext.appex/Ext"
        );
        assert_eq!(
            top_level_bundle("Payload/App.app/PlugIns/Ext.appex/Ext"),
            Some("Payload/App.app")
        );
        assert_eq!(top_level_bundle("Payload/readme.txt"), None);
    }
}

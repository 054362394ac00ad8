//! Task routing between the Brain and Nerves layers.
//!
//! A goal bypasses the Brain decomposer only when all four gates pass: its
//! principal verb is a whitelisted atomic action, it carries no logical
//! connective, no fuzzy pronoun or wildcard, and its complexity score stays
//! under the threshold. Anything else routes to the Brain.

use tracing::debug;

/// Routing decision for one task text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Brain,
    Nerves,
}

/// Atomic actions executable without Brain decomposition.
const NERVES_WHITELIST: &[&str] = &[
    "move",
    "delete",
    "copy",
    "read",
    "rename",
    "write",
    "scan",
    "compress",
    "uncompress",
    "create_file",
    "create_folder",
    "get_admin",
    "connect_folders",
    "remove",
];

/// Logical connectives forcing the Brain path.
const LOGIC_KEYWORDS: &[&str] = &[
    "如果", "且", "或", "并且", "或者", "除非", "则", "否则", "那么",
    " if ", " and ", " or ", " when ", " unless ", " except ", " then ", " otherwise ",
];

/// Fuzzy pronouns and wildcards that make entities indeterminate.
const FUZZY_PRONOUNS: &[&str] = &[
    "那个", "一些", "相关", "*", "某些", "任意", "每个", "它", "它们", "这个", "这些",
    " that ", " some ", " related ", " any ", " each ", " those ",
];

/// Sentence connectives penalized by the complexity score.
const SENTENCE_CONNECTIVES: &[&str] =
    &["，", "；", ",", ";", "然后", "接着", "之后", "并且", "而且"];

/// Verb prefixes mapped to whitelisted actions, longest match first.
const VERB_TABLE: &[(&str, &str)] = &[
    ("创建文件夹", "create_folder"),
    ("连接文件夹", "connect_folders"),
    ("获取权限", "get_admin"),
    ("创建文件", "create_file"),
    ("解压缩", "uncompress"),
    ("移动", "move"),
    ("删除", "delete"),
    ("复制", "copy"),
    ("读取", "read"),
    ("重命名", "rename"),
    ("写入", "write"),
    ("扫描", "scan"),
    ("压缩", "compress"),
    ("解压", "uncompress"),
    ("创建", "create_file"),
    ("获取", "get_admin"),
    ("连接", "connect_folders"),
    ("移除", "remove"),
    ("建立", "create_folder"),
    ("新建", "create_file"),
    ("制作", "create_file"),
    ("备份", "copy"),
    ("转移", "move"),
    ("搬运", "move"),
    ("拷贝", "copy"),
    ("剪切", "move"),
    ("改名", "rename"),
    ("命名", "rename"),
    ("查看", "read"),
    ("检查", "scan"),
    ("搜寻", "scan"),
    ("查找", "scan"),
    ("打包", "compress"),
    ("解包", "uncompress"),
    ("归档", "compress"),
];

/// Rule-based router deciding the entry layer for a goal.
#[derive(Debug, Clone)]
pub struct TaskRouter {
    complexity_threshold: u32,
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self {
            complexity_threshold: 25,
        }
    }
}

impl TaskRouter {
    pub fn new(complexity_threshold: u32) -> Self {
        Self {
            complexity_threshold,
        }
    }

    /// Route a task text to the Brain or Nerves layer.
    pub fn route(&self, task: &str) -> Route {
        let verb = self.extract_verb(task);
        if verb.map_or(true, |v| !NERVES_WHITELIST.contains(&v)) {
            debug!(task, "routing to Brain: no whitelisted verb");
            return Route::Brain;
        }
        if contains_any(task, LOGIC_KEYWORDS) {
            debug!(task, "routing to Brain: logical connective");
            return Route::Brain;
        }
        if contains_any(task, FUZZY_PRONOUNS) {
            debug!(task, "routing to Brain: fuzzy pronoun");
            return Route::Brain;
        }
        if self.complexity(task) > self.complexity_threshold {
            debug!(task, "routing to Brain: complexity over threshold");
            return Route::Brain;
        }
        Route::Nerves
    }

    /// True when the verb is directly executable by the Nerves layer.
    pub fn is_nerves_action(&self, verb: &str) -> bool {
        NERVES_WHITELIST.contains(&verb)
    }

    /// Extract the task's principal verb.
    ///
    /// Chinese verbs match first (longest prefix wins); English whitelist
    /// verbs match when they appear in the leading third of the text and are
    /// not part of a recognized filename pattern; finally a 2-4 character
    /// sliding window over the task head is tried against the table.
    fn extract_verb<'a>(&self, task: &str) -> Option<&'a str> {
        let lower = task.to_lowercase();
        // "read"-like verbs inside filename patterns are not verbs.
        let filename_context =
            lower.contains("readme") || lower.contains(".md") || lower.contains(".txt");

        for (chinese, english) in VERB_TABLE {
            if task.contains(chinese) {
                if (*chinese == "读取" || *chinese == "查看") && filename_context {
                    continue;
                }
                return Some(english);
            }
        }

        for verb in NERVES_WHITELIST {
            if let Some(pos) = lower.find(verb) {
                if *verb == "read" && lower.contains("readme") {
                    continue;
                }
                // A verb this late in the text is more likely an argument.
                if pos * 10 < lower.len() * 3 {
                    return Some(verb);
                }
            }
        }

        let chars: Vec<char> = task.trim().chars().collect();
        for window in (2..=4).rev() {
            if chars.len() >= window {
                let candidate: String = chars[..window].iter().collect();
                for (chinese, english) in VERB_TABLE {
                    if candidate == *chinese {
                        if (*chinese == "读取" || *chinese == "查看") && filename_context {
                            continue;
                        }
                        return Some(english);
                    }
                }
            }
        }
        None
    }

    /// Complexity score: character count plus a penalty per sentence
    /// connective.
    fn complexity(&self, task: &str) -> u32 {
        let mut score = task.trim().chars().count() as u32;
        for connective in SENTENCE_CONNECTIVES {
            if task.contains(connective) {
                score += 5;
            }
        }
        score
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    // English needles carry surrounding spaces; pad the haystack so word
    // boundaries at the ends still match.
    let padded = format!(" {} ", text.to_lowercase());
    needles.iter().any(|n| padded.contains(n) || text.contains(n))
}

use std::collections::BTreeMap;

/// 项目结构格式化器 - 把扁平的相对路径列表渲染为树形文本
pub struct ProjectStructureFormatter;

impl ProjectStructureFormatter {
    /// 渲染路径树，超过max_depth层的部分被截断
    pub fn format_path_tree<S: AsRef<str>>(paths: &[S], max_depth: usize) -> String {
        let mut tree = PathTree::new();
        for path in paths {
            let normalized = Self::normalize_path(path.as_ref());
            tree.insert_path(&normalized, max_depth);
        }
        tree.to_tree_string()
    }

    /// 统一分隔符并移除 "./" 前缀
    fn normalize_path(path: &str) -> String {
        let path = path.replace('\\', "/");
        path.strip_prefix("./").unwrap_or(&path).to_string()
    }
}

/// 路径树节点
#[derive(Debug)]
struct PathNode {
    name: String,
    children: BTreeMap<String, PathNode>,
}

impl PathNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            children: BTreeMap::new(),
        }
    }
}

/// 路径树结构
#[derive(Debug)]
struct PathTree {
    root: PathNode,
}

impl PathTree {
    fn new() -> Self {
        Self {
            root: PathNode::new(""),
        }
    }

    /// 插入路径到树中
    fn insert_path(&mut self, path: &str, max_depth: usize) {
        let mut current = &mut self.root;
        for component in path
            .split('/')
            .filter(|component| !component.is_empty())
            .take(max_depth)
        {
            current = current
                .children
                .entry(component.to_string())
                .or_insert_with(|| PathNode::new(component));
        }
    }

    /// 生成树形字符串表示
    fn to_tree_string(&self) -> String {
        let mut lines = Vec::new();
        Self::render_node(&self.root, "", true, &mut lines);
        lines.join("\n")
    }

    /// 递归渲染节点
    fn render_node(node: &PathNode, prefix: &str, is_last: bool, lines: &mut Vec<String>) {
        if !node.name.is_empty() {
            let connector = if is_last { "└── " } else { "├── " };
            lines.push(format!("{}{}{}", prefix, connector, node.name));
        }

        let children: Vec<_> = node.children.values().collect();
        for (i, child) in children.iter().enumerate() {
            let is_last_child = i == children.len() - 1;
            let new_prefix = if node.name.is_empty() {
                prefix.to_string()
            } else if is_last {
                format!("{}    ", prefix)
            } else {
                format!("{}│   ", prefix)
            };

            Self::render_node(child, &new_prefix, is_last_child, lines);
        }
    }
}

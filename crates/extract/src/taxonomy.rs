use ingest::SectionKind;
use ingest::SectionKind::{Bonding, Chip, IdentificationMarks, PackageStructure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    /// Trigger phrases for rule-based identification.
    pub keywords: Vec<String>,
    /// Typical test projects that establish the state.
    pub tests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    /// Sections the group is usually described in. Empty means anywhere.
    pub sections: Vec<SectionKind>,
    /// A sentence must mention one of these before state keywords count.
    pub anchors: Vec<String>,
    pub states: Vec<StateSpec>,
}

/// Known physical-state groups and the states inside each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    groups: Vec<GroupSpec>,
}

type StateRow = (&'static str, &'static [&'static str], &'static [&'static str]);
type GroupRow = (
    &'static str,
    &'static [SectionKind],
    &'static [&'static str],
    &'static [StateRow],
);

const EXT: &str = "外部目检";
const INT: &str = "内部目检";
const XSEC: &str = "制样镜检";
const COMP: &str = "成分分析";
const SEM: &str = "扫描电子显微镜检查（SEM）";
const DIM: &str = "物理尺寸测量";
const RGA: &str = "内部气体成分分析(RGA)";
const XRAY: &str = "X射线检查";
const ELEC: &str = "电性能测试";

const PLATING_KEYWORDS: &[&str] = &["镀层", "镀Ni", "镀镍", "镀Au", "镀金", "镀Ag", "镀银", "镀锡"];

const BUILTIN: &[GroupRow] = &[
    (
        "封装结构",
        &[PackageStructure],
        &[],
        &[
            (
                "封装形式",
                &["陶瓷封装", "金属封装", "塑料封装", "塑封", "金属陶瓷", "引线框架", "DIP", "CQFP", "QFP", "SOP", "LCC", "BGA", "CCGA", "PGA"],
                &[EXT],
            ),
            ("引线预成型结构", &["预成型", "预弯曲"], &[EXT]),
            ("引线引出位置", &["顶部引出", "中部引出", "底部引出", "侧面引出"], &[EXT]),
            ("盖板密封工艺", &["熔封", "缝焊", "储能焊", "焊料环"], &[EXT]),
            ("管壳密封材料", &["金锡焊料", "密封玻璃", "有机胶密封", "密封材料"], &[EXT, COMP]),
            ("管壳材料", &["管壳材料", "管壳为", "管壳采用", "陶瓷管壳", "金属管壳"], &[EXT, XSEC, COMP]),
            ("封装气氛", &["高纯氮", "干燥空气", "真空封装", "内部气氛", "充氮"], &[RGA]),
            ("封装关键气氛-水汽", &["水汽"], &[RGA]),
            ("封装关键气氛-氢气", &["氢气"], &[RGA]),
        ],
    ),
    (
        "标识",
        &[IdentificationMarks],
        &[],
        &[
            ("标识内容完整性", &["标识内容", "标识完整", "标识清晰", "标识齐全", "缺少标识"], &[EXT]),
            ("标识工艺", &["油墨印刷", "激光打标", "激光标识", "标签粘贴", "蚀刻", "印刷"], &[EXT]),
            ("标识牢固度", &["牢固", "脱落", "耐溶剂", "附着力"], &[EXT]),
        ],
    ),
    (
        "盖板",
        &[PackageStructure],
        &["盖板"],
        &[
            ("盖板基材", &["可伐", "Fe/Co/Ni", "铁镍", "Ni", "合金", "盖板材料"], &[XSEC, COMP]),
            ("金属盖板是否接地", &["接地"], &[XRAY, ELEC]),
            ("镀层材料", PLATING_KEYWORDS, &[EXT, XSEC, COMP]),
        ],
    ),
    (
        "壳体",
        &[PackageStructure],
        &["壳体", "管壳", "外壳"],
        &[
            ("壳体材料", &["氧化铝", "陶瓷", "可伐", "Fe/Co/Ni", "铁镍", "壳体材料"], &[EXT, INT, XSEC, COMP]),
            ("镀层材料", PLATING_KEYWORDS, &[EXT, INT, XSEC, COMP]),
            ("陶瓷壳体内部金属化布线材料", &["金属化布线", "布线材料", "钨", "钼", "W", "Mo"], &[XSEC, COMP]),
            ("通孔材料", &["通孔"], &[XSEC, COMP]),
        ],
    ),
    (
        "安全间距",
        &[Bonding, PackageStructure],
        &["间距", "距离"],
        &[
            ("芯片与腔体侧壁间距", &["侧壁"], &[EXT, INT, DIM]),
            ("键合丝间间距", &["键合丝间", "丝间", "引线间"], &[EXT, INT, DIM]),
            ("键合丝与盖板间距", &["键合丝与盖板", "键合丝距盖板", "丝与盖板"], &[EXT, INT, DIM]),
            ("内部元器件与盖板间距", &["元器件与盖板"], &[EXT, INT, DIM]),
            ("键合丝与壳体间距", &["键合丝与壳体", "键合丝与管壳", "丝与壳体"], &[EXT, INT, DIM]),
            ("引出端最小绝缘间距", &["绝缘间距", "引出端间距", "管脚间距"], &[EXT, INT, DIM]),
            ("键合点间间距", &["键合点间"], &[EXT, INT, DIM]),
        ],
    ),
    (
        "热沉",
        &[PackageStructure],
        &["热沉"],
        &[
            ("热沉结构", &["一体式", "分体式", "热沉结构"], &[XSEC]),
            ("热沉材料", &["钼铜", "钨铜", "无氧铜", "铁镍", "钢", "热沉材料"], &[EXT, XSEC, COMP]),
            ("镀层材料", PLATING_KEYWORDS, &[EXT, INT, XSEC, COMP]),
        ],
    ),
    (
        "引出端",
        &[PackageStructure],
        &["引出端", "管脚", "引脚", "外引线", "焊球", "焊柱"],
        &[
            ("引出端与壳体连接方式", &["银铜焊", "钎焊", "绝缘子"], &[EXT, INT, XSEC, COMP]),
            ("引出端材料", &["可伐", "纯锡", "铅锡", "铜芯可伐", "4J29", "4J42", "铁镍合金", "材料"], &[EXT, XSEC, COMP]),
            ("引出端形状", &["焊球", "焊柱", "垂直引出", "水平引出", "鸥翼", "扁平"], &[EXT]),
            ("镀层材料", PLATING_KEYWORDS, &[EXT, INT, XSEC, COMP]),
        ],
    ),
    (
        "芯片平面结构",
        &[Chip],
        &[],
        &[
            ("芯片安装形式", &["正装", "倒装", "叠层"], &[INT, XSEC]),
            ("表面金属化材料", &["表面金属化", "金属化材料", "金属化为", "铝金属化"], &[INT, XSEC, COMP, SEM]),
            ("表面钝化层材料", &["钝化", "聚酰亚胺"], &[INT, XSEC, COMP, SEM]),
            ("背金材料", &["背金", "背面金属化", "钒镍金", "钛镍银"], &[INT, XSEC, COMP, SEM]),
        ],
    ),
    (
        "芯片纵向结构",
        &[Chip],
        &[],
        &[
            ("金属化层数", &["金属化层数", "层金属", "多层金属", "金属层数", "多层互连"], &[INT, XSEC, COMP, SEM]),
            ("多晶层数", &["多晶"], &[INT, XSEC, COMP, SEM]),
            ("接触孔、通孔工艺", &["接触孔", "钨塞", "TSV", "过孔"], &[INT, XSEC, COMP, SEM]),
            ("层间介质材料", &["层间介质", "介质层", "氧化铪"], &[INT, XSEC, COMP, SEM]),
            ("划片方式", &["划片", "切割"], &[INT, XSEC, SEM]),
        ],
    ),
    (
        "芯片安装",
        &[Chip, Bonding],
        &[],
        &[
            ("安装方式", &["粘接", "烧结", "共晶焊"], &[INT]),
            ("安装材料", &["导电胶", "有机胶", "银浆", "AuSn", "金锡", "粘接剂"], &[INT, XSEC, COMP]),
        ],
    ),
    (
        "键合结构",
        &[Bonding],
        &[],
        &[
            ("丝径", &["丝径", "线径"], &[INT]),
            ("键合丝材料", &["键合丝", "金丝", "铝丝", "硅铝丝", "铜丝", "内引线"], &[INT, XSEC, COMP]),
            ("芯片端键合区域材料", &["芯片端", "压焊块", "芯片焊盘"], &[INT, XSEC, COMP]),
            ("非芯片端键合区域材料", &["非芯片端", "管壳端", "键合指"], &[INT, XSEC, COMP]),
            ("键合工艺", &["楔形键合", "球形键合", "热压键合", "超声键合", "球焊", "楔焊"], &[INT]),
            ("键合界面", &["同质键合", "异质键合", "键合界面", "Au-Al", "金铝"], &[INT, XSEC]),
        ],
    ),
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Taxonomy {
    pub fn new(groups: Vec<GroupSpec>) -> Self {
        Self { groups }
    }

    pub fn builtin() -> Self {
        let groups = BUILTIN
            .iter()
            .map(|(name, sections, anchors, states)| GroupSpec {
                name: name.to_string(),
                sections: sections.to_vec(),
                anchors: strings(anchors),
                states: states
                    .iter()
                    .map(|(state, keywords, tests)| StateSpec {
                        name: state.to_string(),
                        keywords: strings(keywords),
                        tests: strings(tests),
                    })
                    .collect(),
            })
            .collect();
        Self { groups }
    }

    pub fn groups(&self) -> &[GroupSpec] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&GroupSpec> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn contains(&self, group: &str, state: &str) -> bool {
        self.group(group)
            .is_some_and(|g| g.states.iter().any(|s| s.name == state))
    }

    /// The group a state name belongs to, when exactly one group has it.
    pub fn group_of(&self, state: &str) -> Option<&str> {
        let mut owners = self
            .groups
            .iter()
            .filter(|g| g.states.iter().any(|s| s.name == state));
        match (owners.next(), owners.next()) {
            (Some(group), None) => Some(&group.name),
            _ => None,
        }
    }

    /// Add (group, state) pairs learned elsewhere, e.g. from a knowledge base.
    pub fn merge_known<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (group, state) in pairs {
            if self.contains(&group, &state) {
                continue;
            }
            let spec = StateSpec {
                name: state,
                keywords: Vec::new(),
                tests: Vec::new(),
            };
            match self.groups.iter_mut().find(|g| g.name == group) {
                Some(existing) => existing.states.push(spec),
                None => self.groups.push(GroupSpec {
                    name: group,
                    sections: Vec::new(),
                    anchors: Vec::new(),
                    states: vec![spec],
                }),
            }
        }
    }

    /// Reference table for prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            out.push_str(&format!("[{}]\n", group.name));
            for state in &group.states {
                out.push_str("- ");
                out.push_str(&state.name);
                if !state.tests.is_empty() {
                    out.push_str(&format!("（{}）", state.tests.join("、")));
                }
                if !state.keywords.is_empty() {
                    let quoted: Vec<String> = state.keywords.iter().map(|k| format!("\"{k}\"")).collect();
                    out.push_str(&format!("：关键词包括{}等", quoted.join("、")));
                }
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_groups() {
        let taxonomy = Taxonomy::builtin();
        assert_eq!(taxonomy.groups().len(), 11);
        assert!(taxonomy.contains("封装结构", "封装形式"));
        assert!(taxonomy.contains("键合结构", "丝径"));
        assert!(!taxonomy.contains("键合结构", "封装形式"));
    }

    #[test]
    fn test_group_of_requires_unique_owner() {
        let taxonomy = Taxonomy::builtin();
        assert_eq!(taxonomy.group_of("丝径"), Some("键合结构"));
        // plating appears under several groups
        assert_eq!(taxonomy.group_of("镀层材料"), None);
        assert_eq!(taxonomy.group_of("不存在"), None);
    }

    #[test]
    fn test_merge_known() {
        let mut taxonomy = Taxonomy::builtin();
        taxonomy.merge_known(vec![
            ("壳体".to_string(), "镀层厚度".to_string()),
            ("封装结构".to_string(), "封装形式".to_string()),
            ("芯片尺寸".to_string(), "芯片面积".to_string()),
        ]);

        assert!(taxonomy.contains("壳体", "镀层厚度"));
        assert_eq!(taxonomy.groups().len(), 12);
        assert_eq!(taxonomy.group("封装结构").unwrap().states.len(), 9);
    }

    #[test]
    fn test_render_lists_states() {
        let rendered = Taxonomy::builtin().render();
        assert!(rendered.contains("[封装结构]"));
        assert!(rendered.contains("- 封装形式（外部目检）：关键词包括\"陶瓷封装\""));
    }
}

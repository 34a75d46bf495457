//! An in-memory fake SDCC toolchain: each fake tool produces plausible
//! artifacts for the real decoders to chew on, and every invocation is
//! recorded so tests can assert on pipeline ordering.

use romforge::builder::Tool;
use romforge::module::{Error, ModuleFs, ModuleLoader, ToolModule};
use std::cell::RefCell;
use std::rc::Rc;

pub type CallLog = Rc<RefCell<Vec<String>>>;

pub struct FakeLoader {
    pub calls: CallLog,
    pub fail_load: Option<Tool>,
}

impl FakeLoader {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            fail_load: None,
        }
    }
}

impl ModuleLoader for FakeLoader {
    fn load(&mut self, tool: Tool) -> Result<Box<dyn ToolModule>, Error> {
        if self.fail_load == Some(tool) {
            return Err(Error::Load(tool, "fetch failed".to_owned()));
        }
        Ok(Box::new(FakeTool {
            tool,
            calls: self.calls.clone(),
        }))
    }
}

struct FakeTool {
    tool: Tool,
    calls: CallLog,
}

impl ToolModule for FakeTool {
    fn invoke(
        &mut self,
        fs: &mut ModuleFs,
        args: &[String],
        output: &mut dyn FnMut(&str),
    ) -> Result<(), Error> {
        let mut inputs: Vec<String> = fs.paths().map(str::to_owned).collect();
        inputs.sort();
        self.calls
            .borrow_mut()
            .push(format!("{} [{}]", self.tool, inputs.join(" ")));
        match self.tool {
            Tool::Sdcpp => preprocess(fs, args, output),
            Tool::Sdcc => compile(fs, args, output),
            Tool::Sdasz80 => assemble(fs, args, output),
            Tool::Sdldz80 => link(fs, args, output),
        }
        Ok(())
    }
}

fn preprocess(fs: &mut ModuleFs, args: &[String], output: &mut dyn FnMut(&str)) {
    output("sdcpp fake 1.0");
    let infile = &args[args.len() - 2];
    let outfile = &args[args.len() - 1];
    let source = fs.get_file_as_string(infile).unwrap_or_default();
    if source.contains("#error") {
        output(&format!("{}:1: error: explicit #error in source", infile));
        return;
    }
    fs.put_file(outfile, format!("/* preprocessed */\n{}", source));
}

fn compile(fs: &mut ModuleFs, args: &[String], output: &mut dyn FnMut(&str)) {
    let outfile = args
        .iter()
        .position(|a| a == "-o")
        .map(|idx| args[idx + 1].clone())
        .expect("fake sdcc expects -o");
    let infile = args.last().expect("fake sdcc expects an input");
    let source = fs.get_file_as_string(infile).unwrap_or_default();
    if source.contains("BADCODE") {
        output(&format!("{}:2: error 101: bad code reached", infile));
        return;
    }
    // Carry the input text so any source edit propagates through the
    // chain the way real codegen differences would.
    fs.put_file(
        &outfile,
        format!(
            ";; generated by fake sdcc\n;; {}\n\t.area _CODE\n_main::\n\tld a, #42\n\tret\n",
            source.escape_default()
        ),
    );
}

fn assemble(fs: &mut ModuleFs, args: &[String], output: &mut dyn FnMut(&str)) {
    let rel = &args[1];
    let asm = &args[2];
    let source = fs.get_file_as_string(asm).unwrap_or_default();
    if source.contains("BADASM") {
        output(&format!("?ASxxxx-Error-<o> in line 2 of {}", asm));
        output("              missing operand");
        return;
    }
    let lst = r#"             .area _CODE
   0000        1 _main::
   0000 3E 2A         [ 7]    2     ld a, #42
   0002 C9            [10]    3     ret
"#;
    fs.put_file(rel, format!("XH\nM {}\n; {}\n", rel, source.escape_default()));
    fs.put_file(&format!("{}.lst", &rel[..rel.len() - 4]), lst);
}

fn link(fs: &mut ModuleFs, args: &[String], _output: &mut dyn FnMut(&str)) {
    let ihx = args
        .iter()
        .position(|a| a == "-i")
        .map(|idx| args[idx + 1].clone())
        .expect("fake sdld expects -i");
    let prefix = &ihx[..ihx.len() - 4];

    fs.put_file(&ihx, ":030000003E2AC9CC\n:00000001FF\n".to_owned());
    fs.put_file(
        &format!("{}.noi", prefix),
        "DEF _main 0000\n\
         DEF s__CODE 0000\n\
         DEF l__CODE 0003\n\
         DEF s__DATA 8000\n\
         DEF l__DATA 0000\n",
    );

    let rels: Vec<String> = fs
        .paths()
        .filter(|p| p.ends_with(".rel"))
        .map(str::to_owned)
        .collect();
    let rst = r#"             .area _CODE
   0000        1 _main::
                          ;<stdin>:5: void main(void)
   0000 3E 2A         [ 7]    2     ld a, #42
   0002 C9            [10]    3     ret
"#;
    for rel in rels {
        fs.put_file(&format!("{}.rst", &rel[..rel.len() - 4]), rst);
    }
}

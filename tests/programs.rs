// End-to-end programs: assemble from source, load, run, inspect the machine.

use std::io::Cursor;

use diatom::{Assembler, Error, FaultKind, Phase, StackId, State, Vm, VmConfig};
use test_case::test_case;

struct Run {
    stack: Vec<i32>,
    output: Vec<u8>,
}

fn run_with(src: &str, input: &[u8], config: &VmConfig) -> diatom::Result<Run> {
    let image = Assembler::new().assemble(Cursor::new(src))?.image;
    let mut vm = Vm::new(config, Cursor::new(input.to_vec()), Vec::new());
    vm.load(&image)?;
    vm.run()?;
    assert_eq!(vm.state(), State::Halted);
    Ok(Run {
        stack: vm.data_stack().to_vec(),
        output: vm.into_output(),
    })
}

fn run(src: &str) -> diatom::Result<Run> {
    run_with(src, b"", &VmConfig::default())
}

fn fault_kind(res: diatom::Result<Run>) -> FaultKind {
    match res {
        Err(Error::Runtime(fault)) => fault.kind,
        Err(e) => panic!("expected a fault, got {e}"),
        Ok(run) => panic!("expected a fault, got stack {:?}", run.stack),
    }
}

#[test_case("const 10 const 5 + exit", &[15]; "add")]
#[test_case(".codeword double dup + return .end\n:_start const 7 !double exit", &[14]; "codeword call")]
#[test_case(".codeword double dup + return .end const 7 !double exit", &[14]; "codeword call without start")]
#[test_case(".var n 4\n!n @ !n @ * exit", &[16]; "variable then top level code")]
#[test_case("const 3 const 5 < cjmp @L const 0 exit :L const 1 exit", &[1]; "conditional jump taken")]
#[test_case("const 5 const 3 < cjmp @L const 0 exit :L const 1 exit", &[0]; "conditional jump not taken")]
#[test_case("const 1 dup dup drop exit", &[1, 1]; "dup and drop")]
#[test_case("const 1 const 2 swap over exit", &[2, 1, 2]; "swap and over")]
#[test_case("const -5 const 3 + exit", &[-2]; "negative literal")]
#[test_case("const 7 const 2 - const 3 * const 4 / exit", &[3]; "arithmetic chain")]
#[test_case("const -7 const 2 / const -7 const 2 % exit", &[-3, -1]; "truncating division")]
#[test_case("const $7FFFFFFF const 1 + exit", &[i32::MIN]; "wrapping add")]
#[test_case("const 4 const 4 = const 1 const 2 > exit", &[-1, 0]; "comparisons")]
#[test_case("const 0 ~ const 9 ~ exit", &[-1, 0]; "logical not")]
#[test_case("const $0C const $0A and const $0C const $0A or exit", &[8, 14]; "bitwise")]
#[test_case("const 4 rput rpeek rpop + exit", &[8]; "return stack")]
#[test_case("const $100 const 65 b! const $100 b@ exit", &[65]; "byte memory")]
#[test_case("const $200 const -2 ! const $200 @ exit", &[-2]; "word memory")]
#[test_case("jmp @later const 1 :later const 2 exit", &[2]; "forward jump")]
#[test_case("const 1 # the rest is ignored const 9\n( so is this ) const 2 + exit", &[3]; "comments")]
#[test_case(":_start const 7 !double exit\n.codeword double dup + .end", &[14]; "forward word call")]
#[test_case(
    ".codeword double dup + .end\n.colonword quad double double .end\n:_start const 3 !quad exit",
    &[12];
    "colonword calls words"
)]
#[test_case(
    ".codeword double dup + .end\n.colonword ten 5 double .end\n:_start !ten exit",
    &[10];
    "colonword literal"
)]
#[test_case(".const limit $20\n:_start !limit !limit + exit", &[64]; "constant")]
#[test_case(".var n 3\n:_start !n @ exit", &[3]; "variable initial value")]
#[test_case(".var n 3\n:_start !n const 9 ! !n @ exit", &[9]; "variable store")]
#[test_case(".const a 1 .const b 2\n:_start const @_latest @ exit", &[5]; "latest links to previous word")]
fn leaves_stack(src: &str, expected: &[i32]) {
    assert_eq!(run(src).unwrap().stack, expected);
}

#[test_case("key emit exit", b"A", b"A"; "echo")]
#[test_case("key key emit emit exit", b"hi", b"ih"; "reversed pair")]
#[test_case("const 'o' emit const 'k' emit exit", b"", b"ok"; "char literals")]
#[test_case("const $141 emit exit", b"", b"A"; "emit writes low byte")]
fn writes_output(src: &str, input: &[u8], expected: &[u8]) {
    let run = run_with(src, input, &VmConfig::default()).unwrap();
    assert_eq!(run.output, expected);
}

#[test]
fn key_at_end_of_input_pushes_minus_one() {
    let run = run_with("key exit", b"", &VmConfig::default()).unwrap();
    assert_eq!(run.stack, [-1]);
}

#[test_case("drop exit", FaultKind::StackUnderflow(StackId::Data); "data underflow")]
#[test_case("return", FaultKind::StackUnderflow(StackId::Return); "return underflow")]
#[test_case("const 1 const 0 / exit", FaultKind::DivideByZero; "divide by zero")]
#[test_case("const 1 const 0 % exit", FaultKind::DivideByZero; "modulo by zero")]
#[test_case("const -1 @ exit", FaultKind::BadAddress(-1); "fetch below memory")]
#[test_case("jmp $4000", FaultKind::BadAddress(0x4000); "jump past memory")]
#[test_case(".byte 200", FaultKind::UnknownOpcode; "unknown opcode")]
fn faults(src: &str, kind: FaultKind) {
    assert_eq!(fault_kind(run(src)), kind);
}

#[test]
fn data_stack_overflow_faults() {
    let config = VmConfig {
        data_stack: 2,
        ..VmConfig::default()
    };
    let res = run_with("const 1 const 2 const 3 exit", b"", &config);
    assert_eq!(fault_kind(res), FaultKind::StackOverflow(StackId::Data));
}

#[test]
fn return_stack_overflow_faults() {
    let config = VmConfig {
        return_stack: 4,
        ..VmConfig::default()
    };
    let res = run_with(":loop call @loop", b"", &config);
    assert_eq!(fault_kind(res), FaultKind::StackOverflow(StackId::Return));
}

#[test]
fn falling_off_memory_halts() {
    let config = VmConfig {
        memory: 10,
        ..VmConfig::default()
    };
    let run = run_with("const 1", b"", &config).unwrap();
    assert_eq!(run.stack, [1]);
}

#[test_case("const 1\ncjmp @nowhere\nexit", Phase::Label, 2; "undefined label")]
#[test_case(":x exit\n:x exit", Phase::Label, 2; "duplicate label")]
#[test_case("const 1\n\n!missing", Phase::Label, 3; "undefined word")]
#[test_case("const 1\nfrobnicate", Phase::Encoding, 2; "unknown mnemonic")]
#[test_case("const $xyz exit", Phase::Encoding, 1; "malformed literal")]
#[test_case("const 1\nconst", Phase::Encoding, 2; "missing operand")]
#[test_case("( never closed\nexit", Phase::Macro, 1; "unterminated comment")]
#[test_case("exit\n.codeword half const 2 /", Phase::Macro, 2; "unterminated codeword")]
#[test_case(".frob", Phase::Macro, 1; "unknown macro")]
#[test_case(".codeword half const 2 / ) .end", Phase::Macro, 1; "stray paren in codeword")]
#[test_case(".const 9lives 9", Phase::Macro, 1; "numeric word name")]
fn compile_errors(src: &str, phase: Phase, line: usize) {
    let err = Assembler::new().assemble(Cursor::new(src)).unwrap_err();
    assert_eq!(err.phase(), Some(phase), "{err}");
    assert_eq!(err.line(), Some(line), "{err}");
}

#[test]
fn overlong_line_is_lexical() {
    let src = format!("const 1 {}\nexit", "nop ".repeat(80));
    let err = Assembler::new().assemble(Cursor::new(src)).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Lexical));
    assert_eq!(err.line(), Some(1));
}

#[test]
fn assembly_is_deterministic() {
    let src = ".var n 1\n.codeword inc const 1 + .end\n:_start !n @ !inc exit";
    let first = Assembler::new().assemble(Cursor::new(src)).unwrap();
    let second = Assembler::new().assemble(Cursor::new(src)).unwrap();
    assert_eq!(first.image, second.image);
    assert_eq!(first.expanded, second.expanded);
}

#[test]
fn image_is_reloadable() {
    let image = Assembler::new()
        .assemble(Cursor::new("const 2 const 3 * exit"))
        .unwrap()
        .image;
    let mut vm = Vm::without_input(&VmConfig::default(), Vec::new());
    for _ in 0..2 {
        vm.load_from(image.as_slice()).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.data_stack(), [6]);
    }
}

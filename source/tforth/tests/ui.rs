use tforth::{
    testutil::{blocking_runtest, blocking_runtest_with, MemHost},
    throw, Cell, CustomFunction, Forth, ForthParams,
};

fn run(forth: &mut Forth<MemHost>, line: &str) -> Result<String, Cell> {
    forth.fill_input(line).unwrap();
    let res = forth.process_line().map_err(|e| e.code());
    let out = forth.output.as_str().to_string();
    forth.output.clear();
    res.map(|()| out)
}

#[test]
fn square() {
    blocking_runtest(
        r#"
        > : SQUARE DUP * ;
        > 5 SQUARE .
        < 25 ok.
        > -7 SQUARE 2 SQUARE + .
        < 53 ok.
        "#,
    );
}

#[test]
fn uncaught_throw_codes() {
    let mut forth = Forth::new(ForthParams::default(), MemHost::default(), &[]).unwrap();
    assert_eq!(run(&mut forth, "10 0 /"), Err(throw::DIVISION_BY_ZERO));
    assert_eq!(run(&mut forth, ": DEEP RECURSE ; DEEP"), Err(throw::RETURN_STACK_OVERFLOW));
    assert_eq!(run(&mut forth, "NO-SUCH-WORD"), Err(throw::UNDEFINED_WORD));
    assert_eq!(run(&mut forth, "IF"), Err(throw::COMPILE_ONLY));
    assert_eq!(run(&mut forth, "-99 THROW"), Err(-99));
    // the VM is usable again after every one of them
    assert_eq!(run(&mut forth, "1 2 + .").as_deref(), Ok("3 ok.\n"));
}

#[test]
fn catch_keeps_the_stack_shape() {
    blocking_runtest(
        r#"
        > : RISKY ( n -- n' ) DUP 0< IF -24 THROW THEN 2* ;
        > 1 2 5 ' RISKY CATCH . . . .
        < 0 10 2 1 ok.
        > 1 2 -5 ' RISKY CATCH . . . .
        < -24 -5 2 1 ok.
        > : GUARDED ['] RISKY CATCH IF DROP 0 THEN ;
        > -1 GUARDED . 4 GUARDED .
        < 0 8 ok.
        > DEPTH .
        < 0 ok.
        "#,
    );
}

#[test]
fn unbalanced_definition_keeps_the_old_word() {
    let mut forth = Forth::new(ForthParams::default(), MemHost::default(), &[]).unwrap();
    run(&mut forth, ": GREETING 1 ;").unwrap();
    assert_eq!(run(&mut forth, ": GREETING BEGIN ;"), Err(throw::SEMICOLON));
    assert_eq!(run(&mut forth, "GREETING .").as_deref(), Ok("1 ok.\n"));
}

#[test]
fn numbers_follow_base() {
    blocking_runtest(
        r#"
        > HEX FF DECIMAL .
        < 255 ok.
        > BINARY 1011 DECIMAL .
        < 11 ok.
        > -42 . 16 BASE ! -1F DECIMAL .
        < -42 -31 ok.
        > 1. D. 123456789012. D.
        < 1 123456789012 ok.
        x 12Z
        "#,
    );
}

#[test]
fn case_folding() {
    blocking_runtest(
        r#"
        ( case_insensitive true )
        > : sq dup * ;
        > 3 SQ . 4 Sq .
        < 9 16 ok.
        "#,
    );
}

#[test]
fn quiet_mode() {
    blocking_runtest(
        r#"
        ( quiet true )
        > 1 2 + .
        < 3
        > : TWICE 2* ; : TWICE 2* ;
        "#,
    );
}

#[derive(Default)]
struct Recorder {
    seen: Vec<Cell>,
}

fn record(ctx: &mut Recorder, args: &[Cell]) -> Cell {
    ctx.seen.extend_from_slice(args);
    args.iter().sum()
}

fn forget(ctx: &mut Recorder, _args: &[Cell]) -> Cell {
    ctx.seen.clear();
    0
}

impl tforth::Host for Recorder {}

static CUSTOM: &[CustomFunction<Recorder>] = &[
    tforth::custom!("RECORD3", record, 3, true),
    tforth::custom!("FORGET", forget, 0, false),
];

#[test]
fn custom_functions() {
    let mut forth = Forth::new(ForthParams::default(), Recorder::default(), CUSTOM).unwrap();
    blocking_runtest_with(
        &mut forth,
        r#"
        > 1 2 3 RECORD3 .
        < 6 ok.
        > : TWICE 10 20 30 RECORD3 DROP 4 5 6 RECORD3 ;
        > TWICE .
        < 15 ok.
        > DEPTH .
        < 0 ok.
        x 1 2 RECORD3
        "#,
    );
    assert_eq!(forth.host_ctxt.seen, [1, 2, 3, 10, 20, 30, 4, 5, 6]);
    blocking_runtest_with(&mut forth, "> FORGET DEPTH .\n< 0 ok.");
    assert!(forth.release().seen.is_empty());
}

#[test]
fn quit_reads_the_console() {
    let host = MemHost::default()
        .with_console_line(": HELLO .\" hi\" ;")
        .with_console_line("HELLO")
        .with_console_line("OOPS")
        .with_console_line("7 BYE-CODE ! BYE")
        .with_console_line("HELLO");
    let mut forth = Forth::new(ForthParams::default(), host, &[]).unwrap();
    assert_eq!(forth.quit(), 7);
    let console = forth.host_ctxt.console();
    assert!(console.starts_with("ok.\nhiok.\nOOPS ?\n"), "{console}");
    // nothing after BYE runs
    assert_eq!(console.matches("hi").count(), 1);
}

#[test]
fn images_survive_a_round_trip_through_files() {
    let host = MemHost::default().with_file(
        "app.fs",
        ": FIB ( n -- f ) DUP 2 < IF EXIT THEN DUP 1- RECURSE SWAP 2 - RECURSE + ;\n\
         VARIABLE RUNS\n\
         : MAIN 1 RUNS +! 20 FIB . ;\n",
    );
    let mut forth = Forth::new(ForthParams::default(), host, &[]).unwrap();
    run(&mut forth, "INCLUDE app.fs").unwrap();
    assert_eq!(run(&mut forth, "MAIN RUNS @ .").as_deref(), Ok("6765 1 ok.\n"));
    assert_eq!(run(&mut forth, "S\" app.dic\" SAVE-FORTH .").as_deref(), Ok("0 ok.\n"));

    let image = forth.host_ctxt.file(b"app.dic").unwrap().to_vec();
    let mut loaded = Forth::from_image(ForthParams::default(), MemHost::default(), &[], &image).unwrap();
    // variables keep the value they had when the image was written
    assert_eq!(run(&mut loaded, "MAIN RUNS @ .").as_deref(), Ok("6765 2 ok.\n"));
}

#[test]
fn include_depth_is_bounded() {
    let host = MemHost::default().with_file("loop.fs", "INCLUDE loop.fs\n");
    let mut params = ForthParams::default();
    params.include_depth = 4;
    let mut forth = Forth::new(params, host, &[]).unwrap();
    assert_eq!(run(&mut forth, "INCLUDE loop.fs"), Err(throw::INCLUDE_DEPTH));
    assert_eq!(forth.host_ctxt.open_count(), 0);
    assert_eq!(forth.task().input.depth(), 0);
}

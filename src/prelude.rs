//! The bundled standard library, embedded as source text and loaded by
//! [`crate::interp::Lisp::new`] through the normal read-eval path. Pure
//! library code: everything here is expressible with the builtin set.

pub const PRELUDE: &str = r#"
;;;; Standard lisp functions

(defmacro defvar (var val) (list 'setq var val))
(defmacro defparameter (var val) (list 'setq var val))
(defmacro defconst (var val) (list 'setq var val))

(defmacro when (test &rest body)
    (list 'if test (cons 'progn body)))

(defmacro unless (test &rest body)
    `(if (not ,test) (progn ,@body)))

(defun append (x y)
    (if (null x) y
        (cons (car x) (append (cdr x) y))))

(defun reverse (x)
    (if (consp x)
        (append (reverse (cdr x)) (list (car x)))
        x))

(defun memq (a l)
    (if (null l) nil
        (if (eq a (car l)) l
            (memq a (cdr l)))))

(defun assq (x y)
    (cond ((null y) nil)
          ((eq x (car (car y))) (car y))
          (t (assq x (cdr y)))))

(defun nth (i l)
    (if (null l) nil
        (if (eq i 0) (car l)
            (nth (- i 1) (cdr l)))))

(defun last (l)
    (if (null l) l
        (if (null (cdr l)) l
            (last (cdr l)))))

(defun list* (&rest l)
    (let* ((fun (fn (x)
            (if (null x) x
                (if (null (cdr x)) (car x)
                    (cons (car x) (funcall fun (cdr x))))))))
        (funcall fun l)))

(defmacro first (x) `(car ,x))
(defmacro rest (x) `(cdr ,x))
(defmacro second (x) `(car (cdr ,x)))
(defmacro third (x) `(car (cdr (cdr ,x))))
(defmacro caar (x) `(car (car ,x)))
(defmacro cadr (x) `(car (cdr ,x)))
(defmacro cdar (x) `(cdr (car ,x)))
(defmacro cddr (x) `(cdr (cdr ,x)))

(defmacro dolist (params &rest body)
    (let ((var (first params)) (ll (gensym)))
        `(let ((,var nil) (,ll ,(second params)))
            (while ,ll
                (setq ,var (first ,ll))
                (setq ,ll (rest ,ll))
                ,@body))))

(defmacro dotimes (params &rest body)
    (let ((var (first params)) (ll (gensym)))
        `(let ((,var 0) (,ll ,(second params)))
            (while (< ,var ,ll)
                (setq ,var (+ ,var 1))
                ,@body))))

(defmacro incf (var &optional (value 1))
    `(setq ,var (+ ,var ,value)))

(defmacro decf (var &optional (value 1))
    `(setq ,var (- ,var ,value)))

(defun map (f l)
    (if (null l) nil
        (cons (funcall f (car l)) (map f (cdr l)))))

(defun filter (f l)
    (if (null l) nil
        (if (funcall f (car l))
            (cons (car l) (filter f (cdr l)))
            (filter f (cdr l)))))

;;; (case expr (val1 res1) (val2 res2) ...) ->
;;;   (let ((*temp* expr)) (cond ((eq *temp* val1) res1) ...))
(defmacro case (&rest body)
    (let* ((case1 (fn (x)
                (if (null x) nil
                    (cons (cons (list 'eq '*temp* (caar x)) (cdar x))
                          (funcall case1 (cdr x)))))))
        (list 'let (list (list '*temp* (car body)))
              (cons 'cond (funcall case1 (cdr body))))))
"#;
